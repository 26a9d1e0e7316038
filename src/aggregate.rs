//! Dashboard statistics derived from independently fetched collections.

use crate::api::Backend;
use crate::models::{
    Issue, IssueStatus, Payment, PaymentTime, Priority, Property, Resident, ResidentStatus,
};
use chrono::{DateTime, Datelike, Local, TimeZone};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One fetched snapshot. Always replaced wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardData {
    pub residents: Vec<Resident>,
    pub payments: Vec<Payment>,
    pub properties: Vec<Property>,
    pub loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStats {
    pub total_properties: usize,
    pub occupied_units: usize,
    pub monthly_revenue: f64,
    pub occupancy_rate: u32,
}

impl DerivedStats {
    /// Stats as of the current local month.
    pub fn compute(data: &DashboardData) -> Self {
        Self::compute_at(data, &Local::now())
    }

    pub fn compute_at<Tz: TimeZone>(data: &DashboardData, now: &DateTime<Tz>) -> Self {
        let total_properties = data.properties.len();
        let occupied_units = occupied_units(&data.residents);
        Self {
            total_properties,
            occupied_units,
            monthly_revenue: monthly_revenue(&data.payments, now),
            occupancy_rate: occupancy_rate(occupied_units, total_properties),
        }
    }
}

pub fn occupied_units(residents: &[Resident]) -> usize {
    residents
        .iter()
        .filter(|r| r.status == ResidentStatus::Active)
        .count()
}

/// Sum of payments made in the calendar month and year of `now`, judged in
/// `now`'s timezone. A payment with no timestamp counts as made now; one whose
/// timestamp could not be read is left out.
pub fn monthly_revenue<Tz: TimeZone>(payments: &[Payment], now: &DateTime<Tz>) -> f64 {
    let tz = now.timezone();
    payments
        .iter()
        .filter(|p| match p.created_at {
            PaymentTime::At(at) => {
                let at = at.with_timezone(&tz);
                at.year() == now.year() && at.month() == now.month()
            }
            PaymentTime::Missing => true,
            PaymentTime::Invalid => false,
        })
        .map(|p| p.amount)
        .sum()
}

/// Percentage of properties occupied, rounded half up. Zero when there are no
/// properties.
pub fn occupancy_rate(occupied: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let rate = (occupied * 200 + total) / (total * 2);
    u32::try_from(rate).unwrap_or(u32::MAX)
}

/// Issue tallies shown above the issue list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub high_priority: usize,
}

impl IssueCounts {
    pub fn from_issues(issues: &[Issue]) -> Self {
        issues.iter().fold(Self::default(), |mut counts, issue| {
            match issue.status {
                IssueStatus::Pending => counts.pending += 1,
                IssueStatus::InProgress => counts.in_progress += 1,
                IssueStatus::Resolved => counts.resolved += 1,
            }
            if issue.priority == Priority::High {
                counts.high_priority += 1;
            }
            counts
        })
    }
}

/// Fetch residents, payments and properties concurrently. A failed branch
/// contributes an empty collection, so this never fails.
pub async fn fetch_dashboard<B: Backend + ?Sized>(backend: &B) -> DashboardData {
    let (residents, payments, properties) = futures::join!(
        backend.list_residents(),
        backend.list_payments(),
        backend.list_properties(),
    );

    DashboardData {
        residents: residents.unwrap_or_else(|e| {
            log::warn!("Residents unavailable, using empty list: {e}");
            Vec::new()
        }),
        payments: payments.unwrap_or_else(|e| {
            log::warn!("Payments unavailable, using empty list: {e}");
            Vec::new()
        }),
        properties: properties.unwrap_or_else(|e| {
            log::warn!("Properties unavailable, using empty list: {e}");
            Vec::new()
        }),
        loading: false,
    }
}

struct StoreState {
    data: Arc<DashboardData>,
    memo: Option<(Arc<DashboardData>, DerivedStats)>,
}

/// Owner of the current dashboard snapshot and its derived stats.
///
/// Stats are memoized on the identity of the snapshot: they are recomputed
/// only after the snapshot has been replaced.
pub struct DashboardStore {
    state: Mutex<StoreState>,
}

impl Default for DashboardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                data: Arc::new(DashboardData {
                    loading: true,
                    ..DashboardData::default()
                }),
                memo: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Arc<DashboardData> {
        Arc::clone(&self.lock().data)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().data.loading
    }

    pub fn replace(&self, data: DashboardData) {
        self.lock().data = Arc::new(data);
    }

    /// Raise `loading`, fetch all three collections, then install the result.
    pub async fn refresh<B: Backend + ?Sized>(&self, backend: &B) -> Arc<DashboardData> {
        {
            let mut state = self.lock();
            let mut next = (*state.data).clone();
            next.loading = true;
            state.data = Arc::new(next);
        }

        let data = Arc::new(fetch_dashboard(backend).await);
        log::info!(
            "Dashboard refreshed: {} residents, {} payments, {} properties",
            data.residents.len(),
            data.payments.len(),
            data.properties.len()
        );
        self.lock().data = Arc::clone(&data);
        data
    }

    pub fn stats(&self) -> DerivedStats {
        let mut state = self.lock();
        if let Some((key, stats)) = &state.memo {
            if Arc::ptr_eq(key, &state.data) {
                return *stats;
            }
        }
        let stats = DerivedStats::compute(&state.data);
        state.memo = Some((Arc::clone(&state.data), stats));
        stats
    }
}
