//! Interfaces to the systems around the engine: the travel-request approval
//! workflow and the capability checks of the portal's auth layer.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Day;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    /// Dead requests may not acquire rooms.
    pub fn permits_booking(&self) -> bool {
        !matches!(self, ApprovalStatus::Rejected | ApprovalStatus::Cancelled)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(ApprovalStatus::Draft),
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "cancelled" => Some(ApprovalStatus::Cancelled),
            _ => None,
        }
    }
}

/// What the engine needs to know about a travel request (TRF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelRequest {
    pub id: String,
    /// Occupant id of the traveller, when the workflow knows it.
    pub requestor: Option<Ulid>,
    pub depart: Option<Day>,
    pub return_date: Option<Day>,
    pub approval: ApprovalStatus,
}

#[async_trait]
pub trait TravelDesk: Send + Sync {
    async fn lookup(&self, trf_id: &str) -> Option<TravelRequest>;

    /// Append a comment to the request's log. Never fails the booking.
    async fn append_log(&self, trf_id: &str, entry: String);
}

/// Travel desk for deployments without a workflow: every lookup misses.
#[derive(Debug, Default)]
pub struct NoTravelDesk;

#[async_trait]
impl TravelDesk for NoTravelDesk {
    async fn lookup(&self, _trf_id: &str) -> Option<TravelRequest> {
        None
    }

    async fn append_log(&self, _trf_id: &str, _entry: String) {}
}

/// Process-local travel desk fed over the wire (`INSERT INTO travel_requests`).
#[derive(Debug, Default)]
pub struct InMemoryTravelDesk {
    requests: DashMap<String, TravelRequest>,
    logs: DashMap<String, Vec<String>>,
}

impl InMemoryTravelDesk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, request: TravelRequest) {
        self.requests.insert(request.id.clone(), request);
    }

    pub fn log(&self, trf_id: &str) -> Vec<String> {
        self.logs
            .get(trf_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TravelDesk for InMemoryTravelDesk {
    async fn lookup(&self, trf_id: &str) -> Option<TravelRequest> {
        self.requests.get(trf_id).map(|e| e.value().clone())
    }

    async fn append_log(&self, trf_id: &str, entry: String) {
        self.logs.entry(trf_id.to_string()).or_default().push(entry);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Seed reference data, create or lift blocks, delete bookings.
    ManageAccommodation,
    /// Displace existing bookings with a forced block.
    OverrideBookings,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ManageAccommodation => "manage_accommodation",
            Capability::OverrideBookings => "override_bookings",
        }
    }
}

pub trait Authorizer: Send + Sync {
    fn can(&self, actor: &str, capability: Capability) -> bool;
}

/// Grants every capability to a fixed set of user names.
/// An empty set grants everything to every authenticated user.
#[derive(Debug, Default, Clone)]
pub struct AdminList {
    admins: HashSet<String>,
}

impl AdminList {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for AdminList {
    fn can(&self, actor: &str, _capability: Capability) -> bool {
        self.admins.is_empty() || self.admins.contains(actor)
    }
}
