use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::Rng;

/// One inference worker reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub url: String,
}

impl WorkerInfo {
    pub fn new(url: String) -> Self {
        WorkerInfo { url }
    }

    pub fn api_path(&self, api_path: &str) -> String {
        if api_path.starts_with('/') {
            format!("{}{}", self.url, api_path)
        } else {
            format!("{}/{}", self.url, api_path)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LBPolicy {
    RoundRobin,
    LeastConn,
    Random,
}

/// Selects a worker per request. Workers are identical and do not
/// coordinate, so distribution is the only decision made here.
#[derive(Debug)]
pub struct StrategyLB {
    pub policy: LBPolicy,
    pub workers: Vec<WorkerInfo>,
    rr_counter: AtomicUsize,
    inflight: DashMap<String, usize>,
}

impl StrategyLB {
    pub fn new(policy: LBPolicy, workers: Vec<WorkerInfo>) -> Self {
        assert!(!workers.is_empty());
        let inflight = DashMap::new();
        for worker in &workers {
            inflight.insert(worker.url.clone(), 0);
        }
        StrategyLB {
            policy,
            workers,
            rr_counter: AtomicUsize::new(0),
            inflight,
        }
    }

    pub fn get_all_workers(&self) -> Vec<WorkerInfo> {
        self.workers.clone()
    }

    pub fn select(&self) -> WorkerInfo {
        match self.policy {
            LBPolicy::RoundRobin => self.select_round_robin(),
            LBPolicy::LeastConn => self.select_least_conn(),
            LBPolicy::Random => self.select_random(),
        }
    }

    fn select_round_robin(&self) -> WorkerInfo {
        let idx = self.rr_counter.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[idx].clone()
    }

    fn select_least_conn(&self) -> WorkerInfo {
        let mut best = &self.workers[0];
        let mut best_load = usize::MAX;
        for worker in &self.workers {
            let load = self.inflight.get(&worker.url).map(|e| *e).unwrap_or(0);
            if load < best_load {
                best_load = load;
                best = worker;
            }
        }
        best.clone()
    }

    fn select_random(&self) -> WorkerInfo {
        let mut rng = rand::rng();
        self.workers[rng.random_range(0..self.workers.len())].clone()
    }

    /// Tracks a request dispatched to `url`; pair with [`Self::end_request`].
    pub fn begin_request(&self, url: &str) {
        if let Some(mut entry) = self.inflight.get_mut(url) {
            *entry += 1;
        }
    }

    pub fn end_request(&self, url: &str) {
        if let Some(mut entry) = self.inflight.get_mut(url) {
            *entry = entry.saturating_sub(1);
        }
    }

    pub fn inflight_snapshot(&self) -> Vec<(String, usize)> {
        self.workers
            .iter()
            .map(|w| {
                let load = self.inflight.get(&w.url).map(|e| *e).unwrap_or(0);
                (w.url.clone(), load)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_workers() -> Vec<WorkerInfo> {
        (0..3)
            .map(|i| WorkerInfo::new(format!("http://127.0.0.1:808{}", i + 1)))
            .collect()
    }

    #[test]
    fn api_path_joins_with_and_without_slash() {
        let worker = WorkerInfo::new("http://127.0.0.1:8081".to_string());
        assert_eq!(worker.api_path("/ping"), "http://127.0.0.1:8081/ping");
        assert_eq!(worker.api_path("ping"), "http://127.0.0.1:8081/ping");
    }

    #[test]
    fn round_robin_cycles_through_workers() {
        let lb = StrategyLB::new(LBPolicy::RoundRobin, three_workers());
        let picks: Vec<String> = (0..6).map(|_| lb.select().url).collect();
        assert_eq!(picks[0], picks[3]);
        assert_eq!(picks[1], picks[4]);
        assert_eq!(picks[2], picks[5]);
        assert_ne!(picks[0], picks[1]);
        assert_ne!(picks[1], picks[2]);
    }

    #[test]
    fn least_conn_prefers_the_idle_worker() {
        let workers = three_workers();
        let lb = StrategyLB::new(LBPolicy::LeastConn, workers.clone());
        lb.begin_request(&workers[0].url);
        lb.begin_request(&workers[1].url);
        assert_eq!(lb.select().url, workers[2].url);

        lb.end_request(&workers[0].url);
        lb.begin_request(&workers[2].url);
        lb.begin_request(&workers[2].url);
        assert_eq!(lb.select().url, workers[0].url);
    }

    #[test]
    fn end_request_never_underflows() {
        let workers = three_workers();
        let lb = StrategyLB::new(LBPolicy::LeastConn, workers.clone());
        lb.end_request(&workers[0].url);
        assert_eq!(lb.inflight_snapshot()[0].1, 0);
    }

    #[test]
    fn random_stays_within_the_worker_set() {
        let workers = three_workers();
        let lb = StrategyLB::new(LBPolicy::Random, workers.clone());
        for _ in 0..50 {
            let pick = lb.select();
            assert!(workers.contains(&pick));
        }
    }
}
