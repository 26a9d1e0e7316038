use crate::api::Backend;
use crate::models::{Resident, ResidentStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidentFilter {
    #[default]
    All,
    Active,
    Notice,
    Unpaid,
}

/// Status as the roster shows it: a resident with no status is active.
pub fn roster_status(resident: &Resident) -> ResidentStatus {
    match resident.status {
        ResidentStatus::Unknown => ResidentStatus::Active,
        status => status,
    }
}

impl ResidentFilter {
    pub fn matches(self, resident: &Resident) -> bool {
        match self {
            Self::All => true,
            Self::Active => roster_status(resident) == ResidentStatus::Active,
            Self::Notice => roster_status(resident) == ResidentStatus::Notice,
            Self::Unpaid => !resident.rent_paid,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterStats {
    pub total: usize,
    pub active: usize,
    pub notice: usize,
    pub overdue: usize,
}

/// Residents ordered newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    residents: Vec<Resident>,
}

impl Roster {
    /// Residents without a creation time sort ahead of dated ones.
    pub fn new(mut residents: Vec<Resident>) -> Self {
        residents.sort_by_key(|r| Reverse(r.created_at.map_or(i64::MAX, |t| t.timestamp_millis())));
        Self { residents }
    }

    /// Fetch all residents. If that fails and the signed-in user is a
    /// resident, the roster holds just their own profile; otherwise it is
    /// empty.
    pub async fn load<B: Backend + ?Sized>(backend: &B) -> Self {
        match backend.list_residents().await {
            Ok(residents) => {
                log::info!("Loaded {} residents", residents.len());
                Self::new(residents)
            }
            Err(e) => {
                log::error!("Error fetching residents: {e}");
                Self::new(Self::own_profile(backend).await.into_iter().collect())
            }
        }
    }

    async fn own_profile<B: Backend + ?Sized>(backend: &B) -> Option<Resident> {
        let me = match backend.current_user().await {
            Ok(me) => me,
            Err(e) => {
                log::warn!("Could not load current user: {e}");
                return None;
            }
        };
        if me.role != "resident" {
            return None;
        }
        Some(Resident {
            status: ResidentStatus::Active,
            rent_paid: true,
            ..me
        })
    }

    pub fn residents(&self) -> &[Resident] {
        &self.residents
    }

    pub fn filtered(&self, filter: ResidentFilter) -> Vec<&Resident> {
        self.residents.iter().filter(|r| filter.matches(r)).collect()
    }

    pub fn stats(&self) -> RosterStats {
        let count = |filter: ResidentFilter| self.residents.iter().filter(|r| filter.matches(r)).count();
        RosterStats {
            total: self.residents.len(),
            active: count(ResidentFilter::Active),
            notice: count(ResidentFilter::Notice),
            overdue: count(ResidentFilter::Unpaid),
        }
    }
}
