//! Value types shared by the UE context map and the AMF correlation table.

use serde::Serialize;

// ============================================================================
// Subsystem-namespaced index
// ============================================================================

/// A subsystem-local UE index, namespaced by the emitting instance.
///
/// DU, CU-CP and CU-UP index spaces are only unique within one instance, so
/// every index is paired with the `src` string identifying that instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UniqueIndex {
    /// Source instance identifier (e.g. `"du0"`, `"cucp1"`)
    pub src: String,
    /// Index value within that instance
    pub idx: u32,
}

impl UniqueIndex {
    /// Create a new namespaced index
    pub fn new(src: &str, idx: u32) -> Self {
        Self {
            src: src.to_string(),
            idx,
        }
    }
}

impl std::fmt::Display for UniqueIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.src, self.idx)
    }
}

// ============================================================================
// RAN-side identity
// ============================================================================

/// The identifier group known to both DU and CU-CP at UE-add time.
///
/// This triple is the join key used to merge a DU-originated record with a
/// CU-CP-originated record before any direct index mapping exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RanUniqueUeId {
    /// Public Land Mobile Network id
    pub plmn: u32,
    /// Physical Cell Identity
    pub pci: u16,
    /// Cell Radio Network Temporary Identifier
    pub crnti: u16,
}

/// The NGAP identifier pair carried between RAN and core AMF.
///
/// Either side may be absent until the NGAP procedure completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct RanNgapUeIds {
    /// RAN-assigned NGAP UE id
    pub ran_ue_ngap_id: Option<u64>,
    /// AMF-assigned NGAP UE id
    pub amf_ue_ngap_id: Option<u64>,
}

/// One E1AP bearer on a UE context.
///
/// The CU-CP half is set when the bearer context setup starts; the CU-UP
/// half is filled in by the setup completion from the CU-UP side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct E1Bearer {
    /// CU-CP-side E1AP id
    pub cucp: UniqueIndex,
    /// CU-UP-side E1AP id, absent while the bearer is half-open
    pub cuup: Option<UniqueIndex>,
}

// ============================================================================
// Core-network identity
// ============================================================================

/// A 5G GUTI as reported by the core AMF
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreGuti {
    /// PLMN id string as carried in the core message
    pub plmn_id: String,
    /// AMF id (region + set + pointer) string
    pub amf_id: String,
    /// 5G-M-TMSI
    pub mtmsi: u32,
}

/// Tracking Area Identity as reported by the core AMF
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreTai {
    /// PLMN id string
    pub plmn_id: String,
    /// Tracking Area Code string
    pub tac: String,
}

/// Cell Global Identity as reported by the core AMF
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreCgi {
    /// PLMN id string
    pub plmn_id: String,
    /// Cell id string
    pub cell_id: String,
}

/// A core-network-side UE identity record, independent of any RAN-side
/// context until correlated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreAmfInfo {
    /// Subscription Concealed Identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suci: Option<String>,
    /// Subscription Permanent Identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supi: Option<String>,
    /// Home PLMN id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_plmn_id: Option<String>,
    /// GUTI currently assigned to the UE
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_guti: Option<CoreGuti>,
    /// GUTI pending assignment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_guti: Option<CoreGuti>,
    /// Tracking area
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tai: Option<CoreTai>,
    /// Cell
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgi: Option<CoreCgi>,
    /// NGAP id pair seen by the core
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ngap_ids: Option<RanNgapUeIds>,
}

impl CoreAmfInfo {
    /// Whether any identity field (everything except the NGAP id pair) is
    /// present. A record without identity cannot be upserted or matched.
    pub fn has_identity(&self) -> bool {
        self.suci.is_some()
            || self.supi.is_some()
            || self.home_plmn_id.is_some()
            || self.current_guti.is_some()
            || self.next_guti.is_some()
            || self.tai.is_some()
            || self.cgi.is_some()
    }
}

// ============================================================================
// NGAP procedures
// ============================================================================

/// NGAP procedure codes carried by the CU-CP telemetry hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NgapProcedure {
    /// Initial Context Setup
    InitialContextSetup,
    /// UE Context Release
    UeContextRelease,
    /// PDU Session Resource Setup
    PduSessionSetup,
    /// PDU Session Resource Modify
    PduSessionModify,
    /// PDU Session Resource Release
    PduSessionRelease,
    /// Resource Allocation
    ResourceAllocation,
}

impl NgapProcedure {
    /// Get the procedure name
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitialContextSetup => "NGAP_PROCEDURE_INITIAL_CONTEXT_SETUP",
            Self::UeContextRelease => "NGAP_PROCEDURE_UE_CONTEXT_RELEASE",
            Self::PduSessionSetup => "NGAP_PROCEDURE_PDU_SESSION_SETUP",
            Self::PduSessionModify => "NGAP_PROCEDURE_PDU_SESSION_MODIFY",
            Self::PduSessionRelease => "NGAP_PROCEDURE_PDU_SESSION_RELEASE",
            Self::ResourceAllocation => "NGAP_PROCEDURE_RESOURCE_ALLOCATION",
        }
    }

    /// Convert from the raw telemetry procedure code
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::InitialContextSetup),
            2 => Some(Self::UeContextRelease),
            3 => Some(Self::PduSessionSetup),
            4 => Some(Self::PduSessionModify),
            5 => Some(Self::PduSessionRelease),
            6 => Some(Self::ResourceAllocation),
            _ => None,
        }
    }
}
