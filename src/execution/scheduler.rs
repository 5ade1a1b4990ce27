//! Execution scheduler - determines which stages to run next
//!
//! Each stage carries a countdown of unfinished predecessors. A stage is
//! released when its countdown reaches zero; a failure blocks every stage
//! downstream of it instead.

use crate::core::Pipeline;
use std::collections::{HashMap, HashSet};

/// Strategy for scheduling stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute stages in dependency order, one at a time
    Sequential,

    /// Execute all ready stages in parallel
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent stages)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    fn max_running(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Scheduler for determining which stages to run
#[derive(Debug)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
    /// Unfinished predecessors per stage
    remaining: HashMap<String, usize>,
    dependants: HashMap<String, Vec<String>>,
    /// Position in the pipeline's execution order, for stable ordering
    order: HashMap<String, usize>,
    ready: Vec<String>,
    running: HashSet<String>,
    blocked: HashSet<String>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            remaining: HashMap::new(),
            dependants: HashMap::new(),
            order: HashMap::new(),
            ready: Vec::new(),
            running: HashSet::new(),
            blocked: HashSet::new(),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Set up the barriers for a pipeline's stage graph
    pub fn prepare(&mut self, pipeline: &Pipeline) {
        self.remaining.clear();
        self.dependants.clear();
        self.order.clear();
        self.ready.clear();
        self.running.clear();
        self.blocked.clear();

        for (index, id) in pipeline.execution_order().iter().enumerate() {
            self.order.insert(id.clone(), index);
        }

        for stage in pipeline.stages.values() {
            self.remaining.insert(stage.id.clone(), stage.dependencies.len());
            for dep in &stage.dependencies {
                self.dependants
                    .entry(dep.clone())
                    .or_default()
                    .push(stage.id.clone());
            }
        }

        let roots: Vec<String> = self
            .remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        self.release(roots);
    }

    fn release(&mut self, ids: Vec<String>) {
        self.ready.extend(ids);
        sort_by_order(&self.order, &mut self.ready);
    }

    /// Get the next batch of stages to start and mark them running
    pub fn next_stages(&mut self) -> Vec<String> {
        let capacity = self
            .strategy
            .max_running()
            .saturating_sub(self.running.len());
        let take = capacity.min(self.ready.len());

        let batch: Vec<String> = self.ready.drain(..take).collect();
        self.running.extend(batch.iter().cloned());
        batch
    }

    /// Record a successful (or skipped) stage; returns the stages it released
    pub fn complete(&mut self, stage_id: &str) -> Vec<String> {
        self.running.remove(stage_id);

        let mut released = Vec::new();
        for dependant in self.dependants.get(stage_id).cloned().unwrap_or_default() {
            if self.blocked.contains(&dependant) {
                continue;
            }
            if let Some(count) = self.remaining.get_mut(&dependant) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    released.push(dependant);
                }
            }
        }

        sort_by_order(&self.order, &mut released);
        self.release(released.clone());
        released
    }

    /// Record a failed stage; returns every transitive dependant, now blocked
    pub fn fail(&mut self, stage_id: &str) -> Vec<String> {
        self.running.remove(stage_id);

        let mut newly_blocked = Vec::new();
        let mut frontier = vec![stage_id.to_string()];
        while let Some(current) = frontier.pop() {
            for dependant in self.dependants.get(&current).cloned().unwrap_or_default() {
                if self.blocked.insert(dependant.clone()) {
                    frontier.push(dependant.clone());
                    newly_blocked.push(dependant);
                }
            }
        }

        self.ready.retain(|id| !self.blocked.contains(id));
        sort_by_order(&self.order, &mut newly_blocked);
        newly_blocked
    }

    /// Drop everything not yet started (run cancelled)
    pub fn abandon(&mut self) -> Vec<String> {
        self.running.clear();
        let mut dropped: Vec<String> = self.ready.drain(..).collect();
        dropped.extend(
            self.remaining
                .iter()
                .filter(|(id, count)| **count > 0 && !self.blocked.contains(*id))
                .map(|(id, _)| id.clone()),
        );
        sort_by_order(&self.order, &mut dropped);
        dropped
    }

    pub fn is_blocked(&self, stage_id: &str) -> bool {
        self.blocked.contains(stage_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Check if there are more stages to run or wait for
    pub fn has_more(&self) -> bool {
        !self.ready.is_empty() || !self.running.is_empty()
    }
}

/// Stage ids in execution order
fn sort_by_order(order: &HashMap<String, usize>, ids: &mut [String]) {
    ids.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;

    const YAML: &str = r#"
name: "blinko"
stages:
  - id: "bump"
    kind: propagate
    manifests:
      - path: "package.json"
  - id: "desktop"
    kind: build
    depends_on: ["bump"]
    matrix:
      - platform: "linux-x64"
        command: "bun"
  - id: "android"
    kind: build
    depends_on: ["bump"]
    matrix:
      - platform: "android"
        command: "bun"
  - id: "changelog"
    kind: changelog
    depends_on: ["desktop", "android"]
"#;

    fn pipeline() -> Pipeline {
        PipelineConfig::from_yaml(YAML).unwrap().to_pipeline()
    }

    #[test]
    fn test_join_barrier_waits_for_all_predecessors() {
        let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::Parallel);
        scheduler.prepare(&pipeline());

        assert_eq!(scheduler.next_stages(), vec!["bump"]);
        assert!(scheduler.next_stages().is_empty());

        assert_eq!(scheduler.complete("bump"), vec!["android", "desktop"]);
        assert_eq!(scheduler.next_stages(), vec!["android", "desktop"]);

        assert!(scheduler.complete("desktop").is_empty());
        assert_eq!(scheduler.complete("android"), vec!["changelog"]);
        assert_eq!(scheduler.next_stages(), vec!["changelog"]);
        scheduler.complete("changelog");
        assert!(!scheduler.has_more());
    }

    #[test]
    fn test_released_stages_follow_execution_order() {
        const FAN_OUT: &str = r#"
name: "blinko"
stages:
  - id: "bump"
    kind: propagate
    manifests:
      - path: "package.json"
  - id: "android"
    kind: build
    depends_on: ["bump"]
    matrix:
      - platform: "android"
        command: "bun"
  - id: "desktop"
    kind: build
    depends_on: ["bump"]
    matrix:
      - platform: "linux-x64"
        command: "bun"
  - id: "images"
    kind: image-build
    image: "blinkospace/blinko"
    depends_on: ["bump"]
    matrix:
      - platform: "linux/amd64"
        command: "docker"
  - id: "sibling"
    kind: dispatch
    repository: "blinkospace/blinko-desktop"
    event_type: "release"
    depends_on: ["bump"]
"#;
        // Each scheduler hashes its maps differently, so repeat the check
        for _ in 0..16 {
            let pipeline = PipelineConfig::from_yaml(FAN_OUT).unwrap().to_pipeline();
            let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::Parallel);
            scheduler.prepare(&pipeline);
            scheduler.next_stages();

            let expected = vec!["android", "desktop", "images", "sibling"];
            assert_eq!(scheduler.complete("bump"), expected);
            assert_eq!(scheduler.abandon(), expected);
        }
    }

    #[test]
    fn test_sequential_runs_one_at_a_time() {
        let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::Sequential);
        scheduler.prepare(&pipeline());

        assert_eq!(scheduler.next_stages(), vec!["bump"]);
        scheduler.complete("bump");
        assert_eq!(scheduler.next_stages(), vec!["android"]);
        assert!(scheduler.next_stages().is_empty());
        scheduler.complete("android");
        assert_eq!(scheduler.next_stages(), vec!["desktop"]);
    }

    #[test]
    fn test_limited_parallel() {
        let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::LimitedParallel(1));
        scheduler.prepare(&pipeline());
        scheduler.next_stages();
        scheduler.complete("bump");
        assert_eq!(scheduler.next_stages().len(), 1);
        assert_eq!(scheduler.running_count(), 1);
    }

    #[test]
    fn test_failure_blocks_transitive_dependants() {
        let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::Parallel);
        scheduler.prepare(&pipeline());
        scheduler.next_stages();
        scheduler.complete("bump");
        scheduler.next_stages();

        assert_eq!(scheduler.fail("desktop"), vec!["changelog"]);
        assert!(scheduler.is_blocked("changelog"));

        // The sibling still finishes, but the barrier stays closed
        assert!(scheduler.complete("android").is_empty());
        assert!(!scheduler.has_more());
    }

    #[test]
    fn test_root_failure_blocks_everything() {
        let mut scheduler = ExecutionScheduler::new(SchedulingStrategy::Parallel);
        scheduler.prepare(&pipeline());
        scheduler.next_stages();
        assert_eq!(scheduler.fail("bump"), vec!["android", "desktop", "changelog"]);
    }
}
