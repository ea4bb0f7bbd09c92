//! RAN UE Context Correlation Engine
//!
//! A 5G split RAN spreads one subscriber's state across independently
//! indexed subsystems: the DU, the CU-CP, the CU-UP and the core AMF each
//! hand out their own opaque UE index with no shared identifier. This crate
//! reconstructs, incrementally and in real time, a single logical UE
//! identity from the stream of asynchronous lifecycle events those
//! subsystems emit.
//!
//! # Architecture
//!
//! - [`UeContextMap`] owns every UE context record plus the per-subsystem
//!   index tables, and exposes the `hook_*` mutation entry points and the
//!   `getid_by_*` / `getuectx` lookup entry points.
//! - [`AmfCorrelationTable`] (embedded in the map) correlates core-network
//!   identity records (SUCI / SUPI / GUTI / NGAP ids) with RAN-side UE
//!   contexts, with timed eviction of disassociated entries.
//!
//! The embedding application decodes subsystem telemetry and core JSON
//! messages itself and drives the map through discrete hook calls; lookups
//! are then used to annotate outbound reports with the resolved identity.
//!
//! # Concurrency model
//!
//! Single-threaded, call-at-a-time: every hook and lookup runs to
//! completion, nothing blocks and nothing is outstanding between calls.
//! The map performs no locking and never reads the wall clock; every
//! mutating call carries an explicit `now` timestamp so temporal behavior
//! is replayable in tests.
//!
//! # Example
//!
//! ```
//! use std::time::SystemTime;
//! use ran_ue_contexts::UeContextMap;
//!
//! let now = SystemTime::now();
//! let mut map = UeContextMap::new();
//!
//! // DU creates the UE, CU-CP joins it on (plmn, pci, crnti)
//! map.hook_du_ue_ctx_creation("du0", 0, 61712, 1, 17922, 1, 6733824, now);
//! map.hook_cucp_uemgr_ue_add("cucp0", 1, 61712, 1, 17922, now);
//!
//! let ue_id = map.getid_by_du_index("du0", 0).unwrap();
//! assert_eq!(map.getid_by_cucp_index("cucp0", 1), Some(ue_id));
//! ```

pub mod amf;
pub mod context;
pub mod types;


pub use amf::{AmfContextEntry, AmfContextId, AmfCorrelationTable};
pub use context::{UeContext, UeContextId, UeContextMap};
pub use types::{
    CoreAmfInfo, CoreCgi, CoreGuti, CoreTai, E1Bearer, NgapProcedure, RanNgapUeIds,
    RanUniqueUeId, UniqueIndex,
};
