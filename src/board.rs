//! Issue list with optimistic status changes.
//!
//! The authoritative list is published through a `watch` channel; views
//! observe it asynchronously. Alongside it the board keeps a mirror that is
//! written in the same critical section as every publish, and all rollback
//! snapshots are taken from the mirror.
//!
//! Overlapping changes to one issue resolve last-writer-wins: every change
//! carries a sequence number, and only the response to the latest change of
//! an issue may roll it back or clear its in-flight mark. Rollback restores
//! the last value the server accepted for that issue. A confirmation that
//! arrives after a newer change was rolled back still lands, unless an even
//! newer change has been accepted since.

use crate::aggregate::IssueCounts;
use crate::api::Backend;
use crate::error::ApiError;
use crate::models::{Issue, IssueStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// User-facing messages emitted when a status change settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StatusUpdated {
        issue_id: String,
        status: IssueStatus,
    },
    StatusUpdateFailed {
        issue_id: String,
        error: ApiError,
    },
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Self::StatusUpdated { .. } => "Status Updated",
            Self::StatusUpdateFailed { .. } => "Error",
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::StatusUpdated { status, .. } => {
                format!("Issue status changed to {}.", status.label())
            }
            Self::StatusUpdateFailed { .. } => {
                "Failed to update issue status. Please try again.".to_string()
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::StatusUpdateFailed { .. })
    }
}

/// How one status change settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Confirmed,
    /// The server rejected the change. `rolled_back` is false when a newer
    /// change to the same issue was already in flight and owns its state.
    Rejected { error: ApiError, rolled_back: bool },
}

/// Issue list tabs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueFilter {
    #[default]
    All,
    Pending,
    InProgress,
    Resolved,
}

impl IssueFilter {
    pub fn matches(self, issue: &Issue) -> bool {
        match self {
            Self::All => true,
            Self::Pending => issue.status == IssueStatus::Pending,
            Self::InProgress => issue.status == IssueStatus::InProgress,
            Self::Resolved => issue.status == IssueStatus::Resolved,
        }
    }
}

struct InFlight {
    seq: u64,
    /// Last value of the issue the server accepted (or the pre-change value
    /// if nothing has been accepted yet).
    baseline: Issue,
    /// Change that produced `baseline`, 0 if none made on this board.
    baseline_seq: u64,
}

struct BoardState {
    mirror: Arc<Vec<Issue>>,
    in_flight: HashMap<String, InFlight>,
    /// Newest accepted change per settled issue. Outlives the in-flight entry.
    accepted: HashMap<String, u64>,
    next_seq: u64,
    loading: bool,
}

/// Issued change awaiting its server response.
#[derive(Debug)]
pub struct Ticket {
    issue_id: String,
    status: IssueStatus,
    seq: u64,
}

pub struct IssueBoard {
    backend: Arc<dyn Backend>,
    state: Mutex<BoardState>,
    published: watch::Sender<Arc<Vec<Issue>>>,
    notices: mpsc::UnboundedSender<Notification>,
}

impl IssueBoard {
    pub fn new(backend: Arc<dyn Backend>) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let empty = Arc::new(Vec::new());
        let (published, _) = watch::channel(Arc::clone(&empty));
        let (notices, rx) = mpsc::unbounded_channel();
        let board = Self {
            backend,
            state: Mutex::new(BoardState {
                mirror: empty,
                in_flight: HashMap::new(),
                accepted: HashMap::new(),
                next_seq: 0,
                loading: false,
            }),
            published,
            notices,
        };
        (board, rx)
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single write path for the issue list: mirror and published value
    /// change together.
    fn publish(&self, state: &mut BoardState, issues: Arc<Vec<Issue>>) {
        state.mirror = Arc::clone(&issues);
        self.published.send_replace(issues);
    }

    /// Publish a copy of the list with `issue_id` rewritten by `f`.
    fn write_issue(
        &self,
        state: &mut BoardState,
        issue_id: &str,
        f: impl Fn(&Issue) -> Issue,
    ) {
        let updated: Vec<Issue> = state
            .mirror
            .iter()
            .map(|issue| {
                if issue.id == issue_id {
                    f(issue)
                } else {
                    issue.clone()
                }
            })
            .collect();
        self.publish(state, Arc::new(updated));
    }

    /// Publish a fetched list. Pending changes keep their in-flight mark, but
    /// their rollback target becomes the fetched value.
    fn replace_all(&self, state: &mut BoardState, issues: Arc<Vec<Issue>>) {
        for (id, pending) in &mut state.in_flight {
            if let Some(fresh) = issues.iter().find(|i| &i.id == id) {
                pending.baseline = fresh.clone();
            }
        }
        self.publish(state, issues);
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Issue>>> {
        self.published.subscribe()
    }

    /// The authoritative list as last published.
    pub fn issues(&self) -> Arc<Vec<Issue>> {
        Arc::clone(&self.published.borrow())
    }

    pub fn issue(&self, issue_id: &str) -> Option<Issue> {
        self.issues().iter().find(|i| i.id == issue_id).cloned()
    }

    pub fn filtered(&self, filter: IssueFilter) -> Vec<Issue> {
        self.issues()
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> IssueCounts {
        IssueCounts::from_issues(&self.issues())
    }

    pub fn in_flight(&self) -> HashSet<String> {
        self.lock().in_flight.keys().cloned().collect()
    }

    pub fn is_updating(&self, issue_id: &str) -> bool {
        self.lock().in_flight.contains_key(issue_id)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Loading, or any status change still unconfirmed.
    pub fn is_busy(&self) -> bool {
        let state = self.lock();
        state.loading || !state.in_flight.is_empty()
    }

    /// Replace the whole list, e.g. from a snapshot fetched elsewhere.
    pub fn replace_issues(&self, issues: Vec<Issue>) {
        let mut state = self.lock();
        self.replace_all(&mut state, Arc::new(issues));
    }

    /// Fetch the issue list. A failed fetch leaves an empty list.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        self.lock().loading = true;
        let result = self.backend.list_issues().await;

        let mut state = self.lock();
        state.loading = false;
        match result {
            Ok(issues) => {
                let count = issues.len();
                log::info!("Loaded {count} issues");
                self.replace_all(&mut state, Arc::new(issues));
                Ok(count)
            }
            Err(e) => {
                log::warn!("Error fetching issues: {e}");
                self.replace_all(&mut state, Arc::new(Vec::new()));
                Err(e)
            }
        }
    }

    /// Apply `status` to an issue locally and return the future that sends it
    /// to the server and reconciles the answer.
    ///
    /// The local write and the in-flight mark happen before this returns.
    /// Returns `None` without side effects when the issue is not in the list.
    pub fn set_status(
        &self,
        issue_id: &str,
        status: IssueStatus,
    ) -> Option<impl Future<Output = UpdateOutcome> + Send + '_> {
        let ticket = self.begin(issue_id, status)?;
        Some(self.settle(ticket))
    }

    /// Like [`IssueBoard::set_status`], running the request on the tokio runtime.
    pub fn spawn_status_change(
        self: &Arc<Self>,
        issue_id: &str,
        status: IssueStatus,
    ) -> Option<JoinHandle<UpdateOutcome>> {
        let ticket = self.begin(issue_id, status)?;
        let board = Arc::clone(self);
        Some(tokio::spawn(async move { board.settle(ticket).await }))
    }

    /// Optimistic half of a status change.
    pub fn begin(&self, issue_id: &str, status: IssueStatus) -> Option<Ticket> {
        let mut state = self.lock();
        let Some(current) = state.mirror.iter().find(|i| i.id == issue_id).cloned() else {
            log::debug!("set_status: issue {issue_id} not in list, ignoring");
            return None;
        };

        state.next_seq += 1;
        let seq = state.next_seq;
        let pending = match state.in_flight.remove(issue_id) {
            Some(previous) => InFlight { seq, ..previous },
            None => InFlight {
                seq,
                baseline_seq: state.accepted.get(issue_id).copied().unwrap_or(0),
                baseline: current,
            },
        };
        state.in_flight.insert(issue_id.to_string(), pending);

        self.write_issue(&mut state, issue_id, |issue| Issue {
            status,
            ..issue.clone()
        });

        Some(Ticket {
            issue_id: issue_id.to_string(),
            status,
            seq,
        })
    }

    /// Server half of a status change: send it, then confirm or roll back.
    pub async fn settle(&self, ticket: Ticket) -> UpdateOutcome {
        let result = self
            .backend
            .update_issue_status(&ticket.issue_id, ticket.status)
            .await;

        let mut state = self.lock();
        let latest = state
            .in_flight
            .get(&ticket.issue_id)
            .is_some_and(|f| f.seq == ticket.seq);

        let outcome = match result {
            Ok(()) => {
                if latest {
                    state.in_flight.remove(&ticket.issue_id);
                    state.accepted.insert(ticket.issue_id.clone(), ticket.seq);
                } else if let Some(pending) = state.in_flight.get_mut(&ticket.issue_id) {
                    if ticket.seq > pending.baseline_seq {
                        pending.baseline.status = ticket.status;
                        pending.baseline_seq = ticket.seq;
                    }
                } else if state.accepted.get(&ticket.issue_id).copied().unwrap_or(0) < ticket.seq {
                    log::info!(
                        "Late confirmation for issue {}: {}",
                        ticket.issue_id,
                        ticket.status.as_str()
                    );
                    state.accepted.insert(ticket.issue_id.clone(), ticket.seq);
                    self.write_issue(&mut state, &ticket.issue_id, |issue| Issue {
                        status: ticket.status,
                        ..issue.clone()
                    });
                }
                self.notify(Notification::StatusUpdated {
                    issue_id: ticket.issue_id,
                    status: ticket.status,
                });
                UpdateOutcome::Confirmed
            }
            Err(error) => {
                log::error!(
                    "Error updating issue {} to {}: {error}",
                    ticket.issue_id,
                    ticket.status.as_str()
                );
                let restore = if latest {
                    state.in_flight.remove(&ticket.issue_id)
                } else {
                    None
                };
                let rolled_back = restore.is_some();
                if let Some(InFlight {
                    baseline,
                    baseline_seq,
                    ..
                }) = restore
                {
                    state.accepted.insert(ticket.issue_id.clone(), baseline_seq);
                    self.write_issue(&mut state, &ticket.issue_id, |_| baseline.clone());
                }
                self.notify(Notification::StatusUpdateFailed {
                    issue_id: ticket.issue_id,
                    error: error.clone(),
                });
                UpdateOutcome::Rejected { error, rolled_back }
            }
        };
        drop(state);
        outcome
    }

    fn notify(&self, notice: Notification) {
        // Nobody listening is fine.
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{issue_from_wire, Payment, Property, Resident};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{oneshot, Mutex as AsyncMutex};

    type Gate = oneshot::Receiver<Result<(), ApiError>>;

    /// Backend whose status updates block until the test releases them.
    #[derive(Default)]
    struct GatedBackend {
        gates: AsyncMutex<HashMap<(String, IssueStatus), Gate>>,
        issues: Vec<Issue>,
    }

    impl GatedBackend {
        async fn gate(&self, id: &str, status: IssueStatus) -> oneshot::Sender<Result<(), ApiError>> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().await.insert((id.to_string(), status), rx);
            tx
        }
    }

    #[async_trait]
    impl Backend for GatedBackend {
        async fn list_residents(&self) -> Result<Vec<Resident>, ApiError> {
            Ok(Vec::new())
        }
        async fn list_payments(&self) -> Result<Vec<Payment>, ApiError> {
            Ok(Vec::new())
        }
        async fn list_properties(&self) -> Result<Vec<Property>, ApiError> {
            Ok(Vec::new())
        }
        async fn list_issues(&self) -> Result<Vec<Issue>, ApiError> {
            if self.issues.is_empty() {
                return Err(ApiError::Transport("offline".into()));
            }
            Ok(self.issues.clone())
        }
        async fn current_user(&self) -> Result<Resident, ApiError> {
            Err(ApiError::Http {
                status: 401,
                message: "Unauthorized".into(),
            })
        }
        async fn update_issue_status(&self, id: &str, status: IssueStatus) -> Result<(), ApiError> {
            let gate = self.gates.lock().await.remove(&(id.to_string(), status));
            match gate {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(ApiError::Transport("gate dropped".into()))),
                None => Ok(()),
            }
        }
    }

    fn issue(id: &str, status: &str) -> Issue {
        issue_from_wire(&json!({
            "id": id,
            "title": format!("Issue {id}"),
            "status": status,
            "unit": "2A",
        }))
        .unwrap()
    }

    fn board_with(
        backend: Arc<GatedBackend>,
        issues: Vec<Issue>,
    ) -> (Arc<IssueBoard>, mpsc::UnboundedReceiver<Notification>) {
        let (board, rx) = IssueBoard::new(backend);
        board.replace_issues(issues);
        (Arc::new(board), rx)
    }

    fn rejected() -> ApiError {
        ApiError::Http {
            status: 500,
            message: "boom".into(),
        }
    }

    #[tokio::test]
    async fn test_optimistic_write_is_immediate() {
        let backend = Arc::new(GatedBackend::default());
        let release = backend.gate("a", IssueStatus::Resolved).await;
        let (board, mut notices) = board_with(backend, vec![issue("a", "pending")]);
        let watcher = board.subscribe();

        let update = board.set_status("a", IssueStatus::Resolved).unwrap();
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::Resolved);
        assert_eq!(watcher.borrow()[0].status, IssueStatus::Resolved);
        assert!(board.is_updating("a"));
        assert!(board.is_busy());

        release.send(Ok(())).unwrap();
        assert_eq!(update.await, UpdateOutcome::Confirmed);
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::Resolved);
        assert!(board.in_flight().is_empty());

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.title(), "Status Updated");
        assert_eq!(notice.description(), "Issue status changed to resolved.");
    }

    #[tokio::test]
    async fn test_failure_restores_full_value() {
        let backend = Arc::new(GatedBackend::default());
        let release = backend.gate("a", IssueStatus::InProgress).await;
        let original = issue("a", "pending");
        let (board, mut notices) = board_with(backend, vec![original.clone(), issue("b", "pending")]);

        let update = board.set_status("a", IssueStatus::InProgress).unwrap();
        assert!(board.in_flight().contains("a"));
        release.send(Err(rejected())).unwrap();

        let outcome = update.await;
        assert_eq!(
            outcome,
            UpdateOutcome::Rejected {
                error: rejected(),
                rolled_back: true
            }
        );
        assert_eq!(board.issue("a").unwrap(), original);
        assert!(!board.is_updating("a"));

        let notice = notices.recv().await.unwrap();
        assert!(notice.is_error());
        assert_eq!(notice.title(), "Error");
        assert_eq!(
            notice.description(),
            "Failed to update issue status. Please try again."
        );
    }

    #[tokio::test]
    async fn test_missing_issue_is_noop() {
        let backend = Arc::new(GatedBackend::default());
        let (board, mut notices) = board_with(backend, vec![issue("a", "pending")]);
        let before = board.issues();

        assert!(board.set_status("zzz", IssueStatus::Resolved).is_none());
        assert!(Arc::ptr_eq(&before, &board.issues()));
        assert!(board.in_flight().is_empty());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_different_issues_are_independent() {
        let backend = Arc::new(GatedBackend::default());
        let release_a = backend.gate("a", IssueStatus::Resolved).await;
        let release_b = backend.gate("b", IssueStatus::InProgress).await;
        let (board, _notices) = board_with(
            backend,
            vec![issue("a", "pending"), issue("b", "pending")],
        );

        let update_a = board.set_status("a", IssueStatus::Resolved).unwrap();
        let update_b = board.set_status("b", IssueStatus::InProgress).unwrap();
        assert_eq!(board.in_flight().len(), 2);

        release_b.send(Ok(())).unwrap();
        release_a.send(Err(rejected())).unwrap();
        let (a, b) = tokio::join!(update_a, update_b);

        assert!(matches!(a, UpdateOutcome::Rejected { rolled_back: true, .. }));
        assert_eq!(b, UpdateOutcome::Confirmed);
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::Pending);
        assert_eq!(board.issue("b").unwrap().status, IssueStatus::InProgress);
        assert!(board.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_overlap_stale_failure_does_not_clobber_newer_change() {
        let backend = Arc::new(GatedBackend::default());
        let release_first = backend.gate("a", IssueStatus::InProgress).await;
        let release_second = backend.gate("a", IssueStatus::Resolved).await;
        let (board, _notices) = board_with(backend, vec![issue("a", "pending")]);

        let first = board.set_status("a", IssueStatus::InProgress).unwrap();
        let second = board.set_status("a", IssueStatus::Resolved).unwrap();

        release_first.send(Err(rejected())).unwrap();
        release_second.send(Ok(())).unwrap();
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, UpdateOutcome::Rejected { rolled_back: false, .. }));
        assert_eq!(second, UpdateOutcome::Confirmed);
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::Resolved);
        assert!(board.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_overlap_latest_failure_restores_last_accepted() {
        let backend = Arc::new(GatedBackend::default());
        let release_first = backend.gate("a", IssueStatus::InProgress).await;
        let release_second = backend.gate("a", IssueStatus::Resolved).await;
        let (board, _notices) = board_with(backend, vec![issue("a", "pending")]);

        let first = board.spawn_status_change("a", IssueStatus::InProgress).unwrap();
        let second = board.spawn_status_change("a", IssueStatus::Resolved).unwrap();

        release_first.send(Ok(())).unwrap();
        assert_eq!(first.await.unwrap(), UpdateOutcome::Confirmed);
        // The newer change is still outstanding.
        assert!(board.is_updating("a"));
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::Resolved);

        release_second.send(Err(rejected())).unwrap();
        assert!(matches!(
            second.await.unwrap(),
            UpdateOutcome::Rejected { rolled_back: true, .. }
        ));
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::InProgress);
        assert!(!board.is_updating("a"));
    }

    #[tokio::test]
    async fn test_overlap_latest_failure_first_then_older_success_lands() {
        let backend = Arc::new(GatedBackend::default());
        let release_first = backend.gate("a", IssueStatus::InProgress).await;
        let release_second = backend.gate("a", IssueStatus::Resolved).await;
        let (board, _notices) = board_with(backend, vec![issue("a", "pending")]);

        let first = board.spawn_status_change("a", IssueStatus::InProgress).unwrap();
        let second = board.spawn_status_change("a", IssueStatus::Resolved).unwrap();

        release_second.send(Err(rejected())).unwrap();
        assert!(matches!(
            second.await.unwrap(),
            UpdateOutcome::Rejected { rolled_back: true, .. }
        ));
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::Pending);
        assert!(!board.is_updating("a"));

        release_first.send(Ok(())).unwrap();
        assert_eq!(first.await.unwrap(), UpdateOutcome::Confirmed);
        assert_eq!(board.issue("a").unwrap().status, IssueStatus::InProgress);
        assert!(board.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_overlap_older_success_after_newer_success_is_ignored() {
        let backend = Arc::new(GatedBackend::default());
        let release_first = backend.gate("a", IssueStatus::InProgress).await;
        let release_second = backend.gate("a", IssueStatus::Resolved).await;
        let (board, _notices) = board_with(backend, vec![issue("a", "pending")]);

        let first = board.spawn_status_change("a", IssueStatus::InProgress).unwrap();
        let second = board.spawn_status_change("a", IssueStatus::Resolved).unwrap();

        release_second.send(Ok(())).unwrap();
        assert_eq!(second.await.unwrap(), UpdateOutcome::Confirmed);
        release_first.send(Ok(())).unwrap();
        assert_eq!(first.await.unwrap(), UpdateOutcome::Confirmed);

        assert_eq!(board.issue("a").unwrap().status, IssueStatus::Resolved);
        assert!(board.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_after_refresh_restores_fetched_value() {
        let mut fetched = issue("a", "in-progress");
        fetched.title = "Leak under sink".into();
        let backend = Arc::new(GatedBackend {
            issues: vec![fetched.clone()],
            ..GatedBackend::default()
        });
        let release = backend.gate("a", IssueStatus::Resolved).await;
        let (board, _notices) = board_with(backend, vec![issue("a", "pending")]);

        let update = board.spawn_status_change("a", IssueStatus::Resolved).unwrap();
        assert_eq!(board.refresh().await.unwrap(), 1);
        assert!(board.is_updating("a"));

        release.send(Err(rejected())).unwrap();
        assert!(matches!(
            update.await.unwrap(),
            UpdateOutcome::Rejected { rolled_back: true, .. }
        ));
        assert_eq!(board.issue("a").unwrap(), fetched);
    }

    #[tokio::test]
    async fn test_refresh_and_filters() {
        let backend = Arc::new(GatedBackend {
            issues: vec![
                issue("a", "pending"),
                issue("b", "resolved"),
                issue("c", "in-progress"),
            ],
            ..GatedBackend::default()
        });
        let (board, _notices) = IssueBoard::new(backend);
        assert_eq!(board.refresh().await.unwrap(), 3);
        assert!(!board.is_loading());

        assert_eq!(board.filtered(IssueFilter::All).len(), 3);
        let resolved = board.filtered(IssueFilter::Resolved);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "b");
        assert_eq!(board.counts().in_progress, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_empties_list() {
        let backend = Arc::new(GatedBackend::default());
        let (board, _notices) = board_with(backend, vec![issue("a", "pending")]);
        assert!(board.refresh().await.is_err());
        assert!(board.issues().is_empty());
        assert!(board.set_status("a", IssueStatus::Resolved).is_none());
    }
}
