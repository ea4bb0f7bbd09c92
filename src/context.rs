//! UE context map: the multi-keyed identity registry.
//!
//! One [`UeContext`] record per logical UE, looked up through per-subsystem
//! index tables that are rebuilt incrementally on every mutation. Stale
//! bindings (an index reused by a subsystem whose teardown event was never
//! observed) are resolved by silently deleting the older context; conflicts
//! and misses are data, never errors.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::Serialize;

use crate::amf::{AmfContextId, AmfCorrelationTable};
use crate::types::{E1Bearer, NgapProcedure, RanNgapUeIds, RanUniqueUeId, UniqueIndex};

/// Opaque UE context id, monotonically allocated and never reused
pub type UeContextId = u64;

// ============================================================================
// UE context record
// ============================================================================

/// The central mutable record tying one UE's subsystem indices together.
///
/// Each optional field is independently meaningful: a context may hold any
/// subset of the DU / CU-CP / CU-UP indices while the corresponding
/// subsystems are between their creation and teardown events.
///
/// Serializes to the concise report shape: absent fields, the empty bearer
/// list and the internal AMF back-reference are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UeContext {
    /// DU-side index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub du_index: Option<UniqueIndex>,
    /// CU-CP-side index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cucp_index: Option<UniqueIndex>,
    /// CU-UP-side index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cuup_index: Option<UniqueIndex>,
    /// The (plmn, pci, crnti) join key
    pub ran_unique_ue_id: RanUniqueUeId,
    /// NR Cell Identity, known at the DU only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nci: Option<u64>,
    /// Tracking Area Code, known at the DU only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tac: Option<u32>,
    /// E1AP bearers, in setup order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub e1_bearers: Vec<E1Bearer>,
    /// 5G-TMSI, once learned from the CU-CP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmsi: Option<u32>,
    /// NGAP id pair, once an NGAP procedure has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ngap_ids: Option<RanNgapUeIds>,
    /// Back-reference into the AMF correlation table (non-owning)
    #[serde(skip)]
    pub core_amf_context_index: Option<AmfContextId>,
    /// Denormalized copy of the linked core AMF record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_amf_info: Option<crate::types::CoreAmfInfo>,
}

impl UeContext {
    fn new(
        ran_unique_ue_id: RanUniqueUeId,
        du_index: Option<UniqueIndex>,
        cucp_index: Option<UniqueIndex>,
        cuup_index: Option<UniqueIndex>,
        nci: Option<u64>,
        tac: Option<u32>,
    ) -> Self {
        Self {
            du_index,
            cucp_index,
            cuup_index,
            ran_unique_ue_id,
            nci,
            tac,
            e1_bearers: Vec::new(),
            tmsi: None,
            ngap_ids: None,
            core_amf_context_index: None,
            core_amf_info: None,
        }
    }

    /// Whether the context is still owned by any subsystem.
    ///
    /// A context becomes discardable once the DU and CU-CP indices are gone
    /// and the CU-UP side holds no bearers; a CU-UP index alone without
    /// bearers does not keep it alive.
    pub fn used(&self) -> bool {
        if self.du_index.is_some() {
            return true;
        }
        if self.cucp_index.is_some() {
            return true;
        }
        self.cuup_index.is_some() && !self.e1_bearers.is_empty()
    }

    /// Find a bearer by its full (source-qualified) CU-CP E1AP id
    pub fn bearer(&self, cucp_ue_e1ap_id: &UniqueIndex) -> Option<&E1Bearer> {
        self.e1_bearers.iter().find(|b| b.cucp == *cucp_ue_e1ap_id)
    }

    /// Find a bearer by the numeric CU-CP E1AP id alone, ignoring the
    /// source namespace (the CU-UP telemetry does not carry the CU-CP
    /// source string).
    pub fn bearer_no_src_check(&self, cucp_ue_e1ap_id: u32) -> Option<&E1Bearer> {
        self.e1_bearers.iter().find(|b| b.cucp.idx == cucp_ue_e1ap_id)
    }
}

// ============================================================================
// UE context map
// ============================================================================

/// The identity registry: owns every UE context and the per-subsystem index
/// tables, plus the embedded AMF correlation table.
///
/// All hooks and lookups are synchronous and total; the caller serializes
/// access (no internal locking) and supplies `now` to every mutating call.
pub struct UeContextMap {
    next_context_id: UeContextId,
    pub(crate) contexts: HashMap<UeContextId, UeContext>,
    by_du_index: HashMap<UniqueIndex, UeContextId>,
    by_cucp_index: HashMap<UniqueIndex, UeContextId>,
    by_cuup_index: HashMap<UniqueIndex, UeContextId>,
    by_cucp_ue_e1ap_id: HashMap<UniqueIndex, UeContextId>,
    by_cuup_ue_e1ap_id: HashMap<UniqueIndex, UeContextId>,
    /// Timestamp of the hook call being processed
    pub(crate) now: SystemTime,
    /// Core-network correlation state
    pub(crate) amf: AmfCorrelationTable,
}

impl Default for UeContextMap {
    fn default() -> Self {
        Self::new()
    }
}

impl UeContextMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            next_context_id: 0,
            contexts: HashMap::new(),
            by_du_index: HashMap::new(),
            by_cucp_index: HashMap::new(),
            by_cuup_index: HashMap::new(),
            by_cucp_ue_e1ap_id: HashMap::new(),
            by_cuup_ue_e1ap_id: HashMap::new(),
            now: SystemTime::UNIX_EPOCH,
            amf: AmfCorrelationTable::new(),
        }
    }

    // ------------------------------------------------------------------
    // Context lifecycle
    // ------------------------------------------------------------------

    fn context_create(
        &mut self,
        ran_unique_ue_id: RanUniqueUeId,
        du_index: Option<UniqueIndex>,
        cucp_index: Option<UniqueIndex>,
        cuup_index: Option<UniqueIndex>,
        nci: Option<u64>,
        tac: Option<u32>,
    ) -> UeContextId {
        let id = self.next_context_id;
        self.next_context_id += 1;
        log::debug!(
            "context_create: id={} ran_unique_ue_id={:?} du_index={:?} cucp_index={:?} cuup_index={:?}",
            id, ran_unique_ue_id, du_index, cucp_index, cuup_index
        );
        let ue = UeContext::new(
            ran_unique_ue_id,
            du_index.clone(),
            cucp_index.clone(),
            cuup_index.clone(),
            nci,
            tac,
        );
        self.contexts.insert(id, ue);
        if let Some(du_index) = du_index {
            self.set_du_index(id, du_index);
        }
        if let Some(cucp_index) = cucp_index {
            self.set_cucp_index(id, cucp_index);
        }
        if let Some(cuup_index) = cuup_index {
            self.set_cuup_index(id, cuup_index);
        }
        id
    }

    /// Remove a context and every secondary mapping that points at it
    fn context_delete(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.remove(&ue_id) else {
            return;
        };
        log::debug!("context_delete: ue_id={}", ue_id);
        if let Some(du_index) = &ue.du_index {
            self.by_du_index.remove(du_index);
        }
        if let Some(cucp_index) = &ue.cucp_index {
            self.by_cucp_index.remove(cucp_index);
        }
        if let Some(cuup_index) = &ue.cuup_index {
            self.by_cuup_index.remove(cuup_index);
        }
        for bearer in &ue.e1_bearers {
            self.by_cucp_ue_e1ap_id.remove(&bearer.cucp);
            if let Some(cuup) = &bearer.cuup {
                self.by_cuup_ue_e1ap_id.remove(cuup);
            }
        }
        if let Some(amf_id) = ue.core_amf_context_index {
            self.amf.detach(amf_id, self.now);
        }
    }

    /// Delete a context once the last ownership is cleared
    fn delete_unused_context(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.get(&ue_id) else {
            return;
        };
        if ue.used() {
            return;
        }
        log::debug!("delete_unused_context: ue_id={}", ue_id);
        self.context_delete(ue_id);
    }

    // ------------------------------------------------------------------
    // Field setters / clearers (keep the secondary indices in lockstep)
    // ------------------------------------------------------------------

    fn set_du_index(&mut self, ue_id: UeContextId, du_index: UniqueIndex) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("set_du_index: UE context {} does not exist", ue_id);
            return;
        };
        ue.du_index = Some(du_index.clone());
        self.by_du_index.insert(du_index, ue_id);
    }

    fn clear_du_index(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("clear_du_index: UE context {} does not exist", ue_id);
            return;
        };
        if let Some(du_index) = ue.du_index.take() {
            self.by_du_index.remove(&du_index);
        }
        self.delete_unused_context(ue_id);
    }

    fn set_cucp_index(&mut self, ue_id: UeContextId, cucp_index: UniqueIndex) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("set_cucp_index: UE context {} does not exist", ue_id);
            return;
        };
        ue.cucp_index = Some(cucp_index.clone());
        self.by_cucp_index.insert(cucp_index, ue_id);
    }

    fn clear_cucp_index(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("clear_cucp_index: UE context {} does not exist", ue_id);
            return;
        };
        if let Some(cucp_index) = ue.cucp_index.take() {
            self.by_cucp_index.remove(&cucp_index);
        }
        self.delete_unused_context(ue_id);
    }

    fn set_cuup_index(&mut self, ue_id: UeContextId, cuup_index: UniqueIndex) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("set_cuup_index: UE context {} does not exist", ue_id);
            return;
        };
        ue.cuup_index = Some(cuup_index.clone());
        self.by_cuup_index.insert(cuup_index, ue_id);
    }

    fn clear_cuup_index(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("clear_cuup_index: UE context {} does not exist", ue_id);
            return;
        };
        if let Some(cuup_index) = ue.cuup_index.take() {
            self.by_cuup_index.remove(&cuup_index);
        }
        self.delete_unused_context(ue_id);
    }

    /// Append a half-open bearer (CU-CP side only)
    fn set_cucp_ue_e1ap_id(&mut self, ue_id: UeContextId, cucp_ue_e1ap_id: UniqueIndex) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("set_cucp_ue_e1ap_id: UE context {} does not exist", ue_id);
            return;
        };
        ue.e1_bearers.push(E1Bearer {
            cucp: cucp_ue_e1ap_id.clone(),
            cuup: None,
        });
        self.by_cucp_ue_e1ap_id.insert(cucp_ue_e1ap_id, ue_id);
    }

    /// Remove the bearer matching this CU-CP E1AP id; clears the CU-UP
    /// index when the bearer list becomes empty.
    fn clear_cucp_ue_e1ap_id(&mut self, ue_id: UeContextId, cucp_ue_e1ap_id: &UniqueIndex) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("clear_cucp_ue_e1ap_id: UE context {} does not exist", ue_id);
            return;
        };
        let Some(pos) = ue.e1_bearers.iter().position(|b| b.cucp == *cucp_ue_e1ap_id) else {
            return;
        };
        let bearer = ue.e1_bearers.remove(pos);
        let empty = ue.e1_bearers.is_empty();
        self.by_cucp_ue_e1ap_id.remove(&bearer.cucp);
        if let Some(cuup) = &bearer.cuup {
            self.by_cuup_ue_e1ap_id.remove(cuup);
        }
        if empty {
            self.clear_cuup_index(ue_id);
        }
        self.delete_unused_context(ue_id);
    }

    /// Fill in the CU-UP half of the bearer matching this CU-CP E1AP id
    fn set_cuup_ue_e1ap_id(
        &mut self,
        ue_id: UeContextId,
        cucp_ue_e1ap_id: &UniqueIndex,
        cuup_ue_e1ap_id: UniqueIndex,
    ) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("set_cuup_ue_e1ap_id: UE context {} does not exist", ue_id);
            return;
        };
        let Some(bearer) = ue.e1_bearers.iter_mut().find(|b| b.cucp == *cucp_ue_e1ap_id) else {
            log::warn!(
                "set_cuup_ue_e1ap_id: bearer {} not found in UE context {}",
                cucp_ue_e1ap_id,
                ue_id
            );
            return;
        };
        bearer.cuup = Some(cuup_ue_e1ap_id.clone());
        self.by_cuup_ue_e1ap_id.insert(cuup_ue_e1ap_id, ue_id);
    }

    /// Remove the bearer matching this CU-UP E1AP id; clears the CU-UP
    /// index when the bearer list becomes empty.
    fn clear_cuup_ue_e1ap_id(&mut self, ue_id: UeContextId, cuup_ue_e1ap_id: &UniqueIndex) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            log::warn!("clear_cuup_ue_e1ap_id: UE context {} does not exist", ue_id);
            return;
        };
        let Some(pos) = ue
            .e1_bearers
            .iter()
            .position(|b| b.cuup.as_ref() == Some(cuup_ue_e1ap_id))
        else {
            return;
        };
        let bearer = ue.e1_bearers.remove(pos);
        let empty = ue.e1_bearers.is_empty();
        self.by_cucp_ue_e1ap_id.remove(&bearer.cucp);
        if let Some(cuup) = &bearer.cuup {
            self.by_cuup_ue_e1ap_id.remove(cuup);
        }
        if empty {
            self.clear_cuup_index(ue_id);
        }
        self.delete_unused_context(ue_id);
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Number of live contexts
    pub fn get_num_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Ids of all live contexts, in unspecified order
    pub fn context_ids(&self) -> Vec<UeContextId> {
        self.contexts.keys().copied().collect()
    }

    /// Get a context by id
    pub fn getuectx(&self, ue_id: UeContextId) -> Option<&UeContext> {
        self.contexts.get(&ue_id)
    }

    /// Find the context owning a DU index
    pub fn getid_by_du_index(&self, du_src: &str, du_index: u32) -> Option<UeContextId> {
        self.by_du_index
            .get(&UniqueIndex::new(du_src, du_index))
            .copied()
    }

    /// Find the context owning a CU-CP index
    pub fn getid_by_cucp_index(&self, cucp_src: &str, cucp_index: u32) -> Option<UeContextId> {
        self.by_cucp_index
            .get(&UniqueIndex::new(cucp_src, cucp_index))
            .copied()
    }

    /// Find the context owning a CU-UP index
    pub fn getid_by_cuup_index(&self, cuup_src: &str, cuup_index: u32) -> Option<UeContextId> {
        self.by_cuup_index
            .get(&UniqueIndex::new(cuup_src, cuup_index))
            .copied()
    }

    /// Find the context owning a CU-CP E1AP id
    pub fn getid_by_cucp_ue_e1ap_id(
        &self,
        cucp_src: &str,
        cucp_ue_e1ap_id: u32,
    ) -> Option<UeContextId> {
        self.by_cucp_ue_e1ap_id
            .get(&UniqueIndex::new(cucp_src, cucp_ue_e1ap_id))
            .copied()
    }

    /// Find the context owning a CU-CP E1AP id by its numeric value alone.
    ///
    /// The CU-UP telemetry does not carry the CU-CP source string, so the
    /// lookup spans all CU-CP sources.
    fn getid_by_cucp_ue_e1ap_id_no_src_check(&self, cucp_ue_e1ap_id: u32) -> Option<UeContextId> {
        self.by_cucp_ue_e1ap_id
            .iter()
            .filter(|(k, _)| k.idx == cucp_ue_e1ap_id)
            .map(|(_, v)| *v)
            .min()
    }

    /// Find the context owning a CU-UP E1AP id
    pub fn getid_by_cuup_ue_e1ap_id(
        &self,
        cuup_src: &str,
        cuup_ue_e1ap_id: u32,
    ) -> Option<UeContextId> {
        self.by_cuup_ue_e1ap_id
            .get(&UniqueIndex::new(cuup_src, cuup_ue_e1ap_id))
            .copied()
    }

    /// Find the context matching a full (plmn, pci, crnti) triple.
    ///
    /// The hook discipline keeps this key unique; if a duplicate ever
    /// appears the lowest id wins and the condition is logged.
    fn getid_by_ran_unique_ue_id(&self, ran_unique_ue_id: &RanUniqueUeId) -> Option<UeContextId> {
        let mut matches: Vec<UeContextId> = self
            .contexts
            .iter()
            .filter(|(_, ue)| ue.ran_unique_ue_id == *ran_unique_ue_id)
            .map(|(id, _)| *id)
            .collect();
        if matches.len() > 1 {
            log::error!(
                "getid_by_ran_unique_ue_id: {} contexts match {:?}",
                matches.len(),
                ran_unique_ue_id
            );
        }
        matches.sort_unstable();
        matches.first().copied()
    }

    /// Find a context by C-RNTI alone.
    ///
    /// The MAC/FAPI telemetry does not carry the PCI end-to-end, so the
    /// match ignores it; ambiguous matches yield `None`. Only valid under a
    /// single-DU deployment.
    pub fn getid_by_pci_rnti(&self, _pci: u16, rnti: u16) -> Option<UeContextId> {
        let mut it = self
            .contexts
            .iter()
            .filter(|(_, ue)| ue.ran_unique_ue_id.crnti == rnti)
            .map(|(id, _)| *id);
        let first = it.next()?;
        if it.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Find the context holding this RAN-side NGAP id under this CU-CP source
    fn getid_by_ngap_ran_ue_id(
        &self,
        cucp_src: &str,
        ngap_ran_ue_id: Option<u64>,
    ) -> Option<UeContextId> {
        let ngap_ran_ue_id = ngap_ran_ue_id?;
        self.contexts
            .iter()
            .filter(|(_, ue)| {
                ue.ngap_ids
                    .as_ref()
                    .is_some_and(|ids| ids.ran_ue_ngap_id == Some(ngap_ran_ue_id))
                    && ue.cucp_index.as_ref().is_some_and(|idx| idx.src == cucp_src)
            })
            .map(|(id, _)| *id)
            .min()
    }

    /// Find the context holding this AMF-side NGAP id under this CU-CP source
    fn getid_by_ngap_amf_ue_id(
        &self,
        cucp_src: &str,
        ngap_amf_ue_id: Option<u64>,
    ) -> Option<UeContextId> {
        let ngap_amf_ue_id = ngap_amf_ue_id?;
        self.contexts
            .iter()
            .filter(|(_, ue)| {
                ue.ngap_ids
                    .as_ref()
                    .is_some_and(|ids| ids.amf_ue_ngap_id == Some(ngap_amf_ue_id))
                    && ue.cucp_index.as_ref().is_some_and(|idx| idx.src == cucp_src)
            })
            .map(|(id, _)| *id)
            .min()
    }

    /// Find the context whose NGAP id pair matches exactly
    pub fn getid_by_ngap_ue_ids(
        &self,
        ran_ue_ngap_id: Option<u64>,
        amf_ue_ngap_id: Option<u64>,
    ) -> Option<UeContextId> {
        if ran_ue_ngap_id.is_none() && amf_ue_ngap_id.is_none() {
            return None;
        }
        let wanted = RanNgapUeIds {
            ran_ue_ngap_id,
            amf_ue_ngap_id,
        };
        self.contexts
            .iter()
            .filter(|(_, ue)| ue.ngap_ids == Some(wanted))
            .map(|(id, _)| *id)
            .min()
    }

    /// Find the context holding this TMSI
    pub fn getid_by_tmsi(&self, tmsi: u32) -> Option<UeContextId> {
        self.contexts
            .iter()
            .filter(|(_, ue)| ue.tmsi == Some(tmsi))
            .map(|(id, _)| *id)
            .min()
    }

    /// Find the half-open bearer owning this numeric CU-CP E1AP id,
    /// ignoring the source namespace
    fn get_e1_bearer_no_src_check(
        &self,
        cucp_ue_e1ap_id: u32,
    ) -> Option<(UeContextId, Option<E1Bearer>)> {
        let ue_id = self.getid_by_cucp_ue_e1ap_id_no_src_check(cucp_ue_e1ap_id)?;
        let bearer = self
            .contexts
            .get(&ue_id)
            .and_then(|ue| ue.bearer_no_src_check(cucp_ue_e1ap_id))
            .cloned();
        Some((ue_id, bearer))
    }

    // ------------------------------------------------------------------
    // DU hooks
    // ------------------------------------------------------------------

    /// A UE context was created at the DU.
    ///
    /// Any context already owning this DU index, or already matching the
    /// (plmn, pci, crnti) triple, missed its deletion event and is dropped.
    /// The new context never merges with a CU-CP-only record here: DU
    /// events precede CU-CP events, so merging happens in the CU-CP path.
    #[allow(clippy::too_many_arguments)]
    pub fn hook_du_ue_ctx_creation(
        &mut self,
        du_src: &str,
        du_index: u32,
        plmn: u32,
        pci: u16,
        crnti: u16,
        tac: u32,
        nci: u64,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_du_ue_ctx_creation: du_src={} du_index={} plmn={} pci={} crnti={} tac={} nci={}",
            du_src, du_index, plmn, pci, crnti, tac, nci
        );
        self.now = now;

        if let Some(ue_id) = self.getid_by_du_index(du_src, du_index) {
            log::warn!(
                "hook_du_ue_ctx_creation: stale UE context {} already owns du index {}/{}",
                ue_id, du_src, du_index
            );
            self.context_delete(ue_id);
        }

        let du_index = UniqueIndex::new(du_src, du_index);
        let ran_unique_ue_id = RanUniqueUeId { plmn, pci, crnti };

        if let Some(ue_id) = self.getid_by_ran_unique_ue_id(&ran_unique_ue_id) {
            log::warn!(
                "hook_du_ue_ctx_creation: stale UE context {} already matches {:?}",
                ue_id, ran_unique_ue_id
            );
            self.context_delete(ue_id);
        }

        self.context_create(
            ran_unique_ue_id,
            Some(du_index),
            None,
            None,
            Some(nci),
            Some(tac),
        );
    }

    /// The DU re-assigned the UE's C-RNTI
    pub fn hook_du_ue_ctx_update_crnti(
        &mut self,
        du_src: &str,
        du_index: u32,
        crnti: u16,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_du_ue_ctx_update_crnti: du_src={} du_index={} crnti={}",
            du_src, du_index, crnti
        );
        self.now = now;

        let Some(ue_id) = self.getid_by_du_index(du_src, du_index) else {
            log::debug!(
                "hook_du_ue_ctx_update_crnti: UE for du index {}/{} not found",
                du_src, du_index
            );
            return;
        };
        if let Some(ue) = self.contexts.get_mut(&ue_id) {
            ue.ran_unique_ue_id.crnti = crnti;
        }
    }

    /// The UE context was deleted at the DU
    pub fn hook_du_ue_ctx_deletion(&mut self, du_src: &str, du_index: u32, now: SystemTime) {
        log::debug!(
            "hook_du_ue_ctx_deletion: du_src={} du_index={}",
            du_src, du_index
        );
        self.now = now;

        if let Some(ue_id) = self.getid_by_du_index(du_src, du_index) {
            self.clear_du_index(ue_id);
        }
    }

    // ------------------------------------------------------------------
    // CU-CP hooks
    // ------------------------------------------------------------------

    /// A UE was added at the CU-CP.
    ///
    /// Joins an existing DU-only context on (plmn, pci, crnti) when its
    /// CU-CP index is still empty; a context already carrying a CU-CP index
    /// for that triple is stale and replaced.
    pub fn hook_cucp_uemgr_ue_add(
        &mut self,
        cucp_src: &str,
        cucp_index: u32,
        plmn: u32,
        pci: u16,
        crnti: u16,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_cucp_uemgr_ue_add: cucp_src={} cucp_index={} plmn={} pci={} crnti={}",
            cucp_src, cucp_index, plmn, pci, crnti
        );
        self.now = now;

        if let Some(ue_id) = self.getid_by_cucp_index(cucp_src, cucp_index) {
            log::warn!(
                "hook_cucp_uemgr_ue_add: stale UE context {} already owns cucp index {}/{}",
                ue_id, cucp_src, cucp_index
            );
            self.context_delete(ue_id);
        }

        let cucp_index = UniqueIndex::new(cucp_src, cucp_index);
        let ran_unique_ue_id = RanUniqueUeId { plmn, pci, crnti };

        match self.getid_by_ran_unique_ue_id(&ran_unique_ue_id) {
            None => {
                self.context_create(ran_unique_ue_id, None, Some(cucp_index), None, None, None);
            }
            Some(ue_id) => {
                let has_cucp = self
                    .contexts
                    .get(&ue_id)
                    .is_some_and(|ue| ue.cucp_index.is_some());
                if has_cucp {
                    log::warn!(
                        "hook_cucp_uemgr_ue_add: stale UE context {} already matches {:?}",
                        ue_id, ran_unique_ue_id
                    );
                    self.context_delete(ue_id);
                    self.context_create(ran_unique_ue_id, None, Some(cucp_index), None, None, None);
                } else {
                    self.set_cucp_index(ue_id, cucp_index);
                }
            }
        }
    }

    /// The UE was removed at the CU-CP
    pub fn hook_cucp_uemgr_ue_remove(&mut self, cucp_src: &str, cucp_index: u32, now: SystemTime) {
        log::debug!(
            "hook_cucp_uemgr_ue_remove: cucp_src={} cucp_index={}",
            cucp_src, cucp_index
        );
        self.now = now;

        if let Some(ue_id) = self.getid_by_cucp_index(cucp_src, cucp_index) {
            self.clear_cucp_index(ue_id);
        }
    }

    // ------------------------------------------------------------------
    // E1AP bearer hooks
    // ------------------------------------------------------------------

    /// The CU-CP started an E1AP bearer context setup
    pub fn hook_e1_cucp_bearer_context_setup(
        &mut self,
        cucp_src: &str,
        cucp_index: u32,
        gnb_cucp_ue_e1ap_id: u32,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_e1_cucp_bearer_context_setup: cucp_src={} cucp_index={} gnb_cucp_ue_e1ap_id={}",
            cucp_src, cucp_index, gnb_cucp_ue_e1ap_id
        );
        self.now = now;

        let e1ap_id = UniqueIndex::new(cucp_src, gnb_cucp_ue_e1ap_id);

        if let Some(ue_id) = self.getid_by_cucp_ue_e1ap_id(cucp_src, gnb_cucp_ue_e1ap_id) {
            log::warn!(
                "hook_e1_cucp_bearer_context_setup: stale UE context {} already owns e1ap id {}",
                ue_id, e1ap_id
            );
            self.clear_cucp_ue_e1ap_id(ue_id, &e1ap_id);
        }

        let Some(ue_id) = self.getid_by_cucp_index(cucp_src, cucp_index) else {
            log::debug!(
                "hook_e1_cucp_bearer_context_setup: UE for cucp index {}/{} not found",
                cucp_src, cucp_index
            );
            return;
        };

        self.set_cucp_ue_e1ap_id(ue_id, e1ap_id);
    }

    /// The CU-UP completed (or failed) an E1AP bearer context setup.
    ///
    /// The half-open bearer is located by the numeric CU-CP E1AP id without
    /// a source check: the CU-UP telemetry does not carry the CU-CP source
    /// string, so a single E1AP id space is assumed to span CU-CP sources.
    pub fn hook_e1_cuup_bearer_context_setup(
        &mut self,
        cuup_src: &str,
        cuup_index: u32,
        gnb_cucp_ue_e1ap_id: u32,
        gnb_cuup_ue_e1ap_id: u32,
        success: bool,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_e1_cuup_bearer_context_setup: success={} cuup_src={} cuup_index={} \
             gnb_cucp_ue_e1ap_id={} gnb_cuup_ue_e1ap_id={}",
            success, cuup_src, cuup_index, gnb_cucp_ue_e1ap_id, gnb_cuup_ue_e1ap_id
        );
        self.now = now;

        let cuup_index = UniqueIndex::new(cuup_src, cuup_index);
        let cuup_e1ap_id = UniqueIndex::new(cuup_src, gnb_cuup_ue_e1ap_id);

        if let Some(ue_id) = self.getid_by_cuup_ue_e1ap_id(cuup_src, gnb_cuup_ue_e1ap_id) {
            log::warn!(
                "hook_e1_cuup_bearer_context_setup: stale UE context {} already owns e1ap id {}",
                ue_id, cuup_e1ap_id
            );
            self.clear_cuup_ue_e1ap_id(ue_id, &cuup_e1ap_id);
        }

        let Some((ue_id, bearer)) = self.get_e1_bearer_no_src_check(gnb_cucp_ue_e1ap_id) else {
            log::debug!(
                "hook_e1_cuup_bearer_context_setup: no bearer with cucp e1ap id {}",
                gnb_cucp_ue_e1ap_id
            );
            return;
        };

        // A bearer that already completed with a different CU-UP id is
        // stale: tear it down, the mapping cannot be done this round.
        if let Some(existing) = bearer.as_ref().and_then(|b| b.cuup.clone()) {
            if existing != cuup_e1ap_id {
                self.clear_cuup_ue_e1ap_id(ue_id, &existing);
                return;
            }
        }

        if let Some(other) = self.getid_by_cuup_index(&cuup_index.src, cuup_index.idx) {
            if other != ue_id {
                log::warn!(
                    "hook_e1_cuup_bearer_context_setup: stale UE context {} already owns cuup index {}",
                    other, cuup_index
                );
                self.context_delete(other);
                return;
            }
        }

        if !success {
            if let Some(bearer) = bearer {
                self.clear_cucp_ue_e1ap_id(ue_id, &bearer.cucp);
            }
            return;
        }

        if let Some(bearer) = bearer {
            self.set_cuup_ue_e1ap_id(ue_id, &bearer.cucp, cuup_e1ap_id);
        }
        self.set_cuup_index(ue_id, cuup_index);
    }

    /// The CU-UP released an E1AP bearer.
    ///
    /// The bearer is matched by the CU-UP E1AP id alone; the CU-CP id is
    /// accepted but not checked, which also cleans up stale bearers when
    /// the capture started after their setup.
    pub fn hook_e1_cuup_bearer_context_release(
        &mut self,
        cuup_src: &str,
        cuup_index: u32,
        cucp_ue_e1ap_id: u32,
        cuup_ue_e1ap_id: u32,
        success: bool,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_e1_cuup_bearer_context_release: success={} cuup_src={} cuup_index={} \
             cucp_ue_e1ap_id={} cuup_ue_e1ap_id={}",
            success, cuup_src, cuup_index, cucp_ue_e1ap_id, cuup_ue_e1ap_id
        );
        self.now = now;

        if !success {
            return;
        }

        if let Some(ue_id) = self.getid_by_cuup_ue_e1ap_id(cuup_src, cuup_ue_e1ap_id) {
            let cuup_e1ap_id = UniqueIndex::new(cuup_src, cuup_ue_e1ap_id);
            self.clear_cuup_ue_e1ap_id(ue_id, &cuup_e1ap_id);
        }
    }

    // ------------------------------------------------------------------
    // NGAP hooks
    // ------------------------------------------------------------------

    /// The CU-CP learned the UE's TMSI; also retries TMSI correlation
    /// against the AMF table.
    pub fn add_tmsi(&mut self, cucp_src: &str, cucp_index: u32, tmsi: u32, now: SystemTime) {
        log::debug!(
            "add_tmsi: cucp_src={} cucp_index={} tmsi={}",
            cucp_src, cucp_index, tmsi
        );
        self.now = now;

        let Some(ue_id) = self.getid_by_cucp_index(cucp_src, cucp_index) else {
            log::debug!(
                "add_tmsi: UE for cucp index {}/{} not found",
                cucp_src, cucp_index
            );
            return;
        };
        if let Some(ue) = self.contexts.get_mut(&ue_id) {
            ue.tmsi = Some(tmsi);
        }
        self.associate_ue_context_with_amf_tmsi(ue_id);
    }

    /// Drop a stale NGAP id binding held by a different context under the
    /// same CU-CP source
    fn clear_stale_ngap_binding(
        &mut self,
        cucp_src: &str,
        cucp_index: &UniqueIndex,
        ran_ue_ngap_id: Option<u64>,
        amf_ue_ngap_id: Option<u64>,
    ) {
        if let Some(ue_id) = self.getid_by_ngap_ran_ue_id(cucp_src, ran_ue_ngap_id) {
            if let Some(ue) = self.contexts.get_mut(&ue_id) {
                if ue.cucp_index.as_ref() != Some(cucp_index) {
                    ue.ngap_ids = None;
                }
            }
        }
        if let Some(ue_id) = self.getid_by_ngap_amf_ue_id(cucp_src, amf_ue_ngap_id) {
            if let Some(ue) = self.contexts.get_mut(&ue_id) {
                if ue.cucp_index.as_ref() != Some(cucp_index) {
                    ue.ngap_ids = None;
                }
            }
        }
    }

    /// An NGAP procedure started for this CU-CP UE
    pub fn hook_ngap_procedure_started(
        &mut self,
        cucp_src: &str,
        cucp_index: u32,
        procedure: NgapProcedure,
        ngap_ran_ue_id: Option<u64>,
        ngap_amf_ue_id: Option<u64>,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_ngap_procedure_started: cucp_src={} cucp_index={} procedure={} \
             ngap_ran_ue_id={:?} ngap_amf_ue_id={:?}",
            cucp_src, cucp_index, procedure.name(), ngap_ran_ue_id, ngap_amf_ue_id
        );
        self.now = now;

        let cucp_idx = UniqueIndex::new(cucp_src, cucp_index);
        self.clear_stale_ngap_binding(cucp_src, &cucp_idx, ngap_ran_ue_id, ngap_amf_ue_id);

        let Some(ue_id) = self.getid_by_cucp_index(cucp_src, cucp_index) else {
            log::debug!(
                "hook_ngap_procedure_started: UE for cucp index {} not found",
                cucp_idx
            );
            return;
        };
        if let Some(ue) = self.contexts.get_mut(&ue_id) {
            ue.ngap_ids = Some(RanNgapUeIds {
                ran_ue_ngap_id: ngap_ran_ue_id,
                amf_ue_ngap_id: ngap_amf_ue_id,
            });
        }
    }

    /// An NGAP procedure completed for this CU-CP UE.
    ///
    /// A successful UE Context Release clears the NGAP ids; a failed
    /// Initial Context Setup rolls them back; any other success records
    /// them and retries AMF correlation by NGAP ids.
    #[allow(clippy::too_many_arguments)]
    pub fn hook_ngap_procedure_completed(
        &mut self,
        cucp_src: &str,
        cucp_index: u32,
        procedure: NgapProcedure,
        success: bool,
        ngap_ran_ue_id: Option<u64>,
        ngap_amf_ue_id: Option<u64>,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_ngap_procedure_completed: cucp_src={} cucp_index={} procedure={} success={} \
             ngap_ran_ue_id={:?} ngap_amf_ue_id={:?}",
            cucp_src, cucp_index, procedure.name(), success, ngap_ran_ue_id, ngap_amf_ue_id
        );
        self.now = now;

        let cucp_idx = UniqueIndex::new(cucp_src, cucp_index);
        self.clear_stale_ngap_binding(cucp_src, &cucp_idx, ngap_ran_ue_id, ngap_amf_ue_id);

        let Some(ue_id) = self.getid_by_cucp_index(cucp_src, cucp_index) else {
            log::debug!(
                "hook_ngap_procedure_completed: UE for cucp index {} not found",
                cucp_idx
            );
            return;
        };

        if !success {
            if procedure == NgapProcedure::InitialContextSetup {
                if let Some(ue) = self.contexts.get_mut(&ue_id) {
                    ue.ngap_ids = None;
                }
            }
            return;
        }

        if procedure == NgapProcedure::UeContextRelease {
            if let Some(ue) = self.contexts.get_mut(&ue_id) {
                ue.ngap_ids = None;
            }
            return;
        }

        if let Some(ue) = self.contexts.get_mut(&ue_id) {
            ue.ngap_ids = Some(RanNgapUeIds {
                ran_ue_ngap_id: ngap_ran_ue_id,
                amf_ue_ngap_id: ngap_amf_ue_id,
            });
        }
        self.associate_ue_context_with_amf_ngap(ue_id);
    }

    /// The NGAP interface was reset.
    ///
    /// With both ids absent, every context under this CU-CP source loses
    /// its NGAP ids; otherwise the single matching context is cleared.
    pub fn hook_ngap_reset(
        &mut self,
        cucp_src: &str,
        ngap_ran_ue_id: Option<u64>,
        ngap_amf_ue_id: Option<u64>,
        now: SystemTime,
    ) {
        log::debug!(
            "hook_ngap_reset: cucp_src={} ngap_ran_ue_id={:?} ngap_amf_ue_id={:?}",
            cucp_src, ngap_ran_ue_id, ngap_amf_ue_id
        );
        self.now = now;

        if ngap_ran_ue_id.is_none() && ngap_amf_ue_id.is_none() {
            log::debug!("hook_ngap_reset: clearing ngap ids for all UEs of {}", cucp_src);
            for ue in self.contexts.values_mut() {
                if ue.cucp_index.as_ref().is_some_and(|idx| idx.src == cucp_src) {
                    ue.ngap_ids = None;
                }
            }
            return;
        }

        if let Some(ue_id) = self.getid_by_ngap_ran_ue_id(cucp_src, ngap_ran_ue_id) {
            if let Some(ue) = self.contexts.get_mut(&ue_id) {
                ue.ngap_ids = None;
            }
            return;
        }

        if let Some(ue_id) = self.getid_by_ngap_amf_ue_id(cucp_src, ngap_amf_ue_id) {
            if let Some(ue) = self.contexts.get_mut(&ue_id) {
                ue.ngap_ids = None;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
