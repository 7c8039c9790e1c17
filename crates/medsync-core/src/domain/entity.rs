//! Entity descriptor
//!
//! Every clinic record type is synchronised by the same engine. The
//! [`EntityKind`] descriptor carries the per-type knobs: local table name,
//! REST endpoint path and the reference fields pointing at other records.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A foreign-key style field inside a record payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    /// Payload field holding the referenced id
    pub field: &'static str,
    /// Entity kind the field points at
    pub target: EntityKind,
}

/// Type tag of a synchronised clinic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Consultation,
    Medicament,
    Vaccination,
    RendezVous,
}

impl EntityKind {
    /// All kinds, parents before the kinds referencing them
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Patient,
        EntityKind::Consultation,
        EntityKind::Medicament,
        EntityKind::Vaccination,
        EntityKind::RendezVous,
    ];

    /// Stable tag used in the queue table and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Patient => "patient",
            EntityKind::Consultation => "consultation",
            EntityKind::Medicament => "medicament",
            EntityKind::Vaccination => "vaccination",
            EntityKind::RendezVous => "rendez_vous",
        }
    }

    /// Local table holding the snapshots of this kind
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Patient => "patients",
            EntityKind::Consultation => "consultations",
            EntityKind::Medicament => "medicaments",
            EntityKind::Vaccination => "vaccinations",
            EntityKind::RendezVous => "rendez_vous",
        }
    }

    /// REST collection path, relative to the API base URL
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::Patient => "/patients",
            EntityKind::Consultation => "/consultations",
            EntityKind::Medicament => "/medicaments",
            EntityKind::Vaccination => "/vaccinations",
            EntityKind::RendezVous => "/rendez-vous",
        }
    }

    /// Fields of this kind that hold ids of other records
    pub fn references(&self) -> &'static [Reference] {
        match self {
            EntityKind::Patient => &[],
            EntityKind::Consultation => &[Reference {
                field: "patientId",
                target: EntityKind::Patient,
            }],
            EntityKind::Medicament => &[Reference {
                field: "consultationId",
                target: EntityKind::Consultation,
            }],
            EntityKind::Vaccination => &[Reference {
                field: "patientId",
                target: EntityKind::Patient,
            }],
            EntityKind::RendezVous => &[Reference {
                field: "patientId",
                target: EntityKind::Patient,
            }],
        }
    }

    /// Kinds (and their fields) whose payloads reference `self`
    pub fn referenced_by(&self) -> Vec<(EntityKind, &'static str)> {
        EntityKind::ALL
            .iter()
            .flat_map(|kind| {
                kind.references()
                    .iter()
                    .filter(|r| r.target == *self)
                    .map(move |r| (*kind, r.field))
            })
            .collect()
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "patient" | "patients" => Ok(EntityKind::Patient),
            "consultation" | "consultations" => Ok(EntityKind::Consultation),
            "medicament" | "medicaments" => Ok(EntityKind::Medicament),
            "vaccination" | "vaccinations" => Ok(EntityKind::Vaccination),
            "rendez_vous" | "rendezvous" => Ok(EntityKind::RendezVous),
            other => Err(DomainError::UnknownEntity(other.to_string())),
        }
    }
}
