//! Test fixtures for creating sample data.

use chrono::{DateTime, Utc};
use kps_core::{
    LicenseRecord, MachineRegistration, OwnerDetails, RecordId, RecordStatus, Term,
};
use kps_licensing::{IssueRequest, SignatureScheme};

pub const SHOP_MACHINE: &str = "SHOP-AB12-CD34";
pub const OTHER_MACHINE: &str = "NEWM-0000-1111";

/// Factory for license records written straight to an authority.
pub struct RecordFixture;

impl RecordFixture {
    /// ACTIVE record with a correctly signed key.
    pub fn active(machine_id: &str, days: f64, created_at: DateTime<Utc>) -> LicenseRecord {
        let term = Term::from_days(days).expect("fixture term in range");
        let key = SignatureScheme::default().seal(
            machine_id,
            created_at.timestamp_millis() + term.as_millis(),
            "PRO",
        );
        LicenseRecord {
            id: RecordId::new(),
            machine_id: machine_id.to_string(),
            key: key.encode(),
            plan: "PRO".to_string(),
            duration_days: days,
            status: RecordStatus::Active,
            created_at,
            owner: OwnerFixture::shop(),
            transferred_to: None,
            price: 1500.0,
        }
    }

    pub fn with_status(status: RecordStatus) -> LicenseRecord {
        LicenseRecord {
            status,
            ..Self::active(SHOP_MACHINE, 30.0, Utc::now())
        }
    }
}

pub struct OwnerFixture;

impl OwnerFixture {
    pub fn shop() -> OwnerDetails {
        OwnerDetails {
            shop_name: "Corner Shop".to_string(),
            owner_name: "Ada".to_string(),
            phone: "555-0100".to_string(),
            address: "1 Main St".to_string(),
        }
    }

    pub fn registration(machine_id: &str) -> MachineRegistration {
        MachineRegistration {
            machine_id: machine_id.to_string(),
            owner: Self::shop(),
            updated_at: Utc::now(),
        }
    }
}

/// Issue request for `machine_id` with no owner override.
pub fn issue_request(machine_id: &str, days: f64) -> IssueRequest {
    IssueRequest {
        machine_id: machine_id.to_string(),
        term: Term::from_days(days).expect("fixture term in range"),
        plan: "PRO".to_string(),
        owner: None,
        price: 0.0,
    }
}
