//! Registry of per-pane classifiers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::classifier::{ClassifierConfig, StateClassifier};
use super::patterns::PatternLibrary;
use super::{AgentActivity, AgentState};
use crate::clock::Clock;
use crate::tmux::PaneCapture;
use crate::util::blocking_with_timeout;
use crate::{zlog_debug, zlog_warn, Error, Result};

/// Lazily creates and holds one [`StateClassifier`] per pane.
///
/// The registry lock is only held long enough to look up or insert a
/// classifier; classification itself runs under each classifier's own lock,
/// so different panes can be classified concurrently.
pub struct ActivityMonitor {
    config: ClassifierConfig,
    capture: Arc<dyn PaneCapture>,
    library: Arc<PatternLibrary>,
    clock: Arc<dyn Clock>,
    classifiers: RwLock<HashMap<String, Arc<StateClassifier>>>,
}

impl std::fmt::Debug for ActivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityMonitor")
            .field("config", &self.config)
            .field("panes", &self.len())
            .finish_non_exhaustive()
    }
}

impl ActivityMonitor {
    pub fn new(
        config: ClassifierConfig,
        capture: Arc<dyn PaneCapture>,
        library: Arc<PatternLibrary>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            capture,
            library,
            clock,
            classifiers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn library(&self) -> &Arc<PatternLibrary> {
        &self.library
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<StateClassifier>>> {
        self.classifiers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<StateClassifier>>> {
        self.classifiers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Classifier for `pane_id`, created with the monitor's config if new.
    pub fn get_or_create(&self, pane_id: &str) -> Arc<StateClassifier> {
        self.get_or_insert(pane_id, "")
    }

    /// Like [`get_or_create`](Self::get_or_create), but a new classifier
    /// starts with `agent_type` instead of the configured one.
    pub fn get_or_create_for(&self, pane_id: &str, agent_type: &str) -> Arc<StateClassifier> {
        self.get_or_insert(pane_id, agent_type)
    }

    fn get_or_insert(&self, pane_id: &str, agent_type: &str) -> Arc<StateClassifier> {
        if let Some(existing) = self.read().get(pane_id) {
            return Arc::clone(existing);
        }

        let mut map = self.write();
        // Another caller may have inserted between the two locks; only the
        // caller that actually inserts picks the agent type.
        let classifier = map.entry(pane_id.to_string()).or_insert_with(|| {
            zlog_debug!("ActivityMonitor: tracking pane {}", pane_id);
            let config = if agent_type.is_empty() {
                self.config.clone()
            } else {
                self.config.clone().with_agent_type(agent_type)
            };
            Arc::new(StateClassifier::new(
                pane_id,
                &config,
                Arc::clone(&self.capture),
                Arc::clone(&self.library),
                Arc::clone(&self.clock),
            ))
        });
        Arc::clone(classifier)
    }

    pub fn get(&self, pane_id: &str) -> Option<Arc<StateClassifier>> {
        self.read().get(pane_id).cloned()
    }

    pub fn remove(&self, pane_id: &str) -> Option<Arc<StateClassifier>> {
        let removed = self.write().remove(pane_id);
        if removed.is_some() {
            zlog_debug!("ActivityMonitor: dropped pane {}", pane_id);
        }
        removed
    }

    /// Classify one pane, registering it first if needed.
    pub fn classify(&self, pane_id: &str) -> Result<AgentActivity> {
        self.get_or_create(pane_id).classify()
    }

    /// Classify on the blocking pool, giving up after `timeout`.
    ///
    /// On timeout the capture keeps running in the background and its result
    /// still updates the classifier when it lands.
    pub async fn classify_with_timeout(
        &self,
        pane_id: &str,
        timeout: Duration,
    ) -> Result<AgentActivity> {
        let classifier = self.get_or_create(pane_id);
        blocking_with_timeout(timeout, move || classifier.classify()).await
    }

    /// Classify every registered pane.
    ///
    /// One pane failing does not stop the others; its error lands in the
    /// second map.
    pub fn classify_all(
        &self,
    ) -> (HashMap<String, AgentActivity>, HashMap<String, Error>) {
        let snapshot: Vec<(String, Arc<StateClassifier>)> = self
            .read()
            .iter()
            .map(|(id, c)| (id.clone(), Arc::clone(c)))
            .collect();

        let mut activities = HashMap::with_capacity(snapshot.len());
        let mut errors = HashMap::new();
        for (pane_id, classifier) in snapshot {
            match classifier.classify() {
                Ok(activity) => {
                    activities.insert(pane_id, activity);
                }
                Err(e) => {
                    zlog_warn!("classify_all: pane {} failed: {}", pane_id, e);
                    errors.insert(pane_id, e);
                }
            }
        }
        (activities, errors)
    }

    /// Current state of every registered pane, without capturing.
    pub fn all_states(&self) -> HashMap<String, AgentState> {
        self.read()
            .iter()
            .map(|(id, c)| (id.clone(), c.current_state()))
            .collect()
    }

    pub fn pane_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn monitor_with(capture: impl PaneCapture + 'static) -> ActivityMonitor {
        ActivityMonitor::new(
            ClassifierConfig::default(),
            Arc::new(capture),
            PatternLibrary::shared_default(),
            Arc::new(ManualClock::default()),
        )
    }

    fn by_pane(pane: &str) -> Result<String> {
        match pane {
            "%1" => Ok("claude> ".to_string()),
            "%2" => Ok("Error: rate limit reached".to_string()),
            other => Err(Error::Capture {
                pane_id: other.to_string(),
                message: "no such pane".to_string(),
            }),
        }
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let monitor = monitor_with(by_pane);
        let a = monitor.get_or_create("%1");
        let b = monitor.get_or_create("%1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(monitor.len(), 1);
        assert!(monitor.get("%9").is_none());
    }

    #[test]
    fn test_classify_all_tolerates_partial_failure() {
        let monitor = monitor_with(by_pane);
        for pane in ["%1", "%2", "%3"] {
            monitor.get_or_create(pane);
        }

        let (activities, errors) = monitor.classify_all();

        assert_eq!(activities.len(), 2);
        assert_eq!(activities["%1"].state, AgentState::Waiting);
        assert_eq!(activities["%2"].state, AgentState::Error);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors["%3"], Error::Capture { .. }));
    }

    #[test]
    fn test_all_states_and_remove() {
        let monitor = monitor_with(by_pane);
        monitor.classify("%1").unwrap();
        monitor.classify("%2").unwrap();

        let states = monitor.all_states();
        assert_eq!(states["%1"], AgentState::Waiting);
        assert_eq!(states["%2"], AgentState::Error);
        assert_eq!(monitor.pane_ids(), vec!["%1", "%2"]);

        assert!(monitor.remove("%1").is_some());
        assert!(monitor.remove("%1").is_none());
        assert_eq!(monitor.len(), 1);

        monitor.clear();
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_get_or_create_for_sets_agent_type_once() {
        let monitor = monitor_with(by_pane);
        let c = monitor.get_or_create_for("%1", "codex");
        assert_eq!(c.agent_type(), "codex");

        let c = monitor.get_or_create_for("%1", "claude");
        assert_eq!(c.agent_type(), "codex");
    }

    #[test]
    fn test_concurrent_get_or_create_for_agrees_on_agent_type() {
        let monitor = Arc::new(monitor_with(by_pane));
        let types = ["claude", "codex", "gemini", "cursor"];

        let handles: Vec<_> = types
            .iter()
            .map(|&agent_type| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || monitor.get_or_create_for("%7", agent_type))
            })
            .collect();
        let classifiers: Vec<Arc<StateClassifier>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Every caller gets the one registered classifier, and its type is
        // one of the requested ones, fixed at creation.
        let winner = monitor.get("%7").unwrap();
        assert!(classifiers.iter().all(|c| Arc::ptr_eq(c, &winner)));
        assert!(types.contains(&winner.agent_type().as_str()));
        assert_eq!(monitor.len(), 1);
    }

    #[tokio::test]
    async fn test_classify_with_timeout_success() {
        let monitor = monitor_with(by_pane);
        let activity = monitor
            .classify_with_timeout("%1", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(activity.state, AgentState::Waiting);
    }

    #[tokio::test]
    async fn test_classify_with_timeout_expires() {
        let slow = |_: &str| -> Result<String> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(String::new())
        };
        let monitor = monitor_with(slow);
        let result = monitor
            .classify_with_timeout("%1", Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
