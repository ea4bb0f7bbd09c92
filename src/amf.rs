//! Core-network (AMF) identity correlation.
//!
//! The AMF reports UE identity records (SUCI / SUPI / GUTI / NGAP ids)
//! independently of any RAN-side state. This module maintains those records
//! and links them 1:1 with [`UeContext`](crate::UeContext) records as
//! information arrives from either side, keeping disassociated records
//! around for a retention window so a UE that re-registers can pick its
//! core identity back up.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::context::{UeContextId, UeContextMap};
use crate::types::{CoreAmfInfo, RanNgapUeIds};

/// Opaque AMF context id, monotonically allocated and never reused
pub type AmfContextId = u64;

/// How long a disassociated AMF entry is retained before eviction
pub const AMF_CONTEXT_RETENTION: Duration = Duration::from_secs(21600);

// ============================================================================
// AMF correlation table
// ============================================================================

/// One core-network identity record and its (optional) link to a UE context
#[derive(Debug, Clone)]
pub struct AmfContextEntry {
    /// The UE context currently linked to this record, if any
    pub linked_ue: Option<UeContextId>,
    /// The identity record as last reported by the core
    pub info: CoreAmfInfo,
    /// When the last UE link was severed; drives timed eviction
    pub disassociated_at: Option<SystemTime>,
}

/// Registry of core-network identity records, keyed by a monotonically
/// increasing id. Owned by [`UeContextMap`]; the linking operations live
/// there because they touch both sides.
pub struct AmfCorrelationTable {
    next_context_id: AmfContextId,
    pub(crate) entries: HashMap<AmfContextId, AmfContextEntry>,
    retention: Duration,
}

impl Default for AmfCorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AmfCorrelationTable {
    /// Create an empty table with the default retention window
    pub fn new() -> Self {
        Self {
            next_context_id: 0,
            entries: HashMap::new(),
            retention: AMF_CONTEXT_RETENTION,
        }
    }

    /// Number of entries, associated or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an entry by id
    pub fn entry(&self, amf_id: AmfContextId) -> Option<&AmfContextEntry> {
        self.entries.get(&amf_id)
    }

    pub(crate) fn alloc_id(&mut self) -> AmfContextId {
        let id = self.next_context_id;
        self.next_context_id += 1;
        id
    }

    /// Sever the UE link on an entry and start its retention clock.
    /// The entry itself is kept: it may be re-associated later.
    pub(crate) fn detach(&mut self, amf_id: AmfContextId, at: SystemTime) {
        if let Some(entry) = self.entries.get_mut(&amf_id) {
            entry.linked_ue = None;
            entry.disassociated_at = Some(at);
        }
    }

    /// Find the entry whose NGAP id pair matches exactly
    pub fn get_amfid_by_ngap_ids(&self, ngap_ids: &RanNgapUeIds) -> Option<AmfContextId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.info.ngap_ids.as_ref() == Some(ngap_ids))
            .map(|(id, _)| *id)
            .min()
    }

    /// Find the entry holding this TMSI, current GUTI first, then next GUTI
    pub fn get_amfid_by_tmsi(&self, tmsi: u32) -> Option<AmfContextId> {
        if let Some(id) = self
            .entries
            .iter()
            .filter(|(_, e)| e.info.current_guti.as_ref().is_some_and(|g| g.mtmsi == tmsi))
            .map(|(id, _)| *id)
            .min()
        {
            return Some(id);
        }
        self.entries
            .iter()
            .filter(|(_, e)| e.info.next_guti.as_ref().is_some_and(|g| g.mtmsi == tmsi))
            .map(|(id, _)| *id)
            .min()
    }

    /// Find an entry by identity: SUCI, then SUPI, then current GUTI, then
    /// next GUTI — keyed by the first of those *present* in the query, not
    /// by a combined match.
    pub fn get_amfid_by_core_amf_info(&self, info: &CoreAmfInfo) -> Option<AmfContextId> {
        if info.suci.is_some() {
            return self
                .entries
                .iter()
                .filter(|(_, e)| e.info.suci.is_some() && e.info.suci == info.suci)
                .map(|(id, _)| *id)
                .min();
        }
        if info.supi.is_some() {
            return self
                .entries
                .iter()
                .filter(|(_, e)| e.info.supi.is_some() && e.info.supi == info.supi)
                .map(|(id, _)| *id)
                .min();
        }
        if info.current_guti.is_some() {
            return self
                .entries
                .iter()
                .filter(|(_, e)| {
                    e.info.current_guti.is_some() && e.info.current_guti == info.current_guti
                })
                .map(|(id, _)| *id)
                .min();
        }
        if info.next_guti.is_some() {
            return self
                .entries
                .iter()
                .filter(|(_, e)| e.info.next_guti.is_some() && e.info.next_guti == info.next_guti)
                .map(|(id, _)| *id)
                .min();
        }
        None
    }
}

// ============================================================================
// Correlation operations (need both the UE map and the AMF table)
// ============================================================================

impl UeContextMap {
    /// Number of AMF entries, associated or not
    pub fn get_num_amf_contexts(&self) -> usize {
        self.amf.len()
    }

    /// Get an AMF entry by id
    pub fn amf_entry(&self, amf_id: AmfContextId) -> Option<&AmfContextEntry> {
        self.amf.entry(amf_id)
    }

    /// Ids of all AMF entries, in unspecified order
    pub fn amf_context_ids(&self) -> Vec<AmfContextId> {
        self.amf.entries.keys().copied().collect()
    }

    /// Find the AMF entry holding this TMSI
    pub fn get_amfid_by_tmsi(&self, tmsi: u32) -> Option<AmfContextId> {
        self.amf.get_amfid_by_tmsi(tmsi)
    }

    /// The core AMF reported a UE identity record.
    ///
    /// Upserts the record (keyed by SUCI / SUPI / current GUTI / next GUTI,
    /// first present key wins), disassociating any UE linked to a stale
    /// version first, then attempts correlation: NGAP ids first, TMSI as
    /// the fallback. A record carrying no identity fields is ignored.
    pub fn hook_core_amf_info(&mut self, info: CoreAmfInfo, now: SystemTime) {
        log::debug!("hook_core_amf_info: {:?}", info);
        self.now = now;

        if !info.has_identity() {
            return;
        }
        self.amf_context_create_update(info);
    }

    /// The core AMF reported that the UE left the RAN.
    ///
    /// The matched entry is disassociated but kept: it may be re-associated
    /// by a later registration, or evicted by [`Self::process_timeout`].
    pub fn hook_core_amf_info_remove_ran(&mut self, info: CoreAmfInfo, now: SystemTime) {
        log::debug!("hook_core_amf_info_remove_ran: {:?}", info);
        self.now = now;

        let Some(amf_id) = self.amf.get_amfid_by_core_amf_info(&info) else {
            return;
        };
        let Some(ue_id) = self.amf.entries.get(&amf_id).and_then(|e| e.linked_ue) else {
            return;
        };
        self.disassociate_amf_context_with_ue(ue_id);
    }

    /// Evict AMF entries whose retention window expired.
    ///
    /// Cooperative: there is no internal timer, the embedding event loop
    /// polls this on its own schedule.
    pub fn process_timeout(&mut self, now: SystemTime) {
        self.now = now;

        let expired: Vec<AmfContextId> = self
            .amf
            .entries
            .iter()
            .filter(|(_, e)| {
                e.disassociated_at
                    .and_then(|t| t.checked_add(self.amf.retention))
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|(id, _)| *id)
            .collect();
        for amf_id in expired {
            log::debug!("process_timeout: evicting AMF context {}", amf_id);
            self.amf_context_delete(amf_id);
        }
    }

    fn amf_context_create_update(&mut self, info: CoreAmfInfo) {
        let amf_id = match self.amf.get_amfid_by_core_amf_info(&info) {
            None => self.amf.alloc_id(),
            Some(amf_id) => {
                // the old record may be linked to a UE that no longer owns
                // this identity
                if let Some(ue_id) = self.amf.entries.get(&amf_id).and_then(|e| e.linked_ue) {
                    self.disassociate_amf_context_with_ue(ue_id);
                }
                amf_id
            }
        };

        self.amf.entries.insert(
            amf_id,
            AmfContextEntry {
                linked_ue: None,
                info,
                disassociated_at: None,
            },
        );

        if !self.associate_amf_context_with_ue_ngap(amf_id) {
            self.associate_amf_context_with_ue_tmsi(amf_id);
        }
    }

    fn amf_context_delete(&mut self, amf_id: AmfContextId) {
        let Some(entry) = self.amf.entries.remove(&amf_id) else {
            return;
        };
        if let Some(ue_id) = entry.linked_ue {
            if let Some(ue) = self.contexts.get_mut(&ue_id) {
                ue.core_amf_context_index = None;
                ue.core_amf_info = None;
            }
        }
    }

    /// Establish the two-way link, severing any previous link on either
    /// side first so the mapping stays strictly 1:1.
    fn link_amf_entry_to_ue(&mut self, amf_id: AmfContextId, ue_id: UeContextId) {
        log::debug!("link_amf_entry_to_ue: amf_id={} ue_id={}", amf_id, ue_id);

        let prev_amf = self
            .contexts
            .get(&ue_id)
            .and_then(|ue| ue.core_amf_context_index);
        if let Some(prev_amf) = prev_amf {
            if prev_amf != amf_id {
                self.amf.detach(prev_amf, self.now);
            }
        }

        let prev_ue = self.amf.entries.get(&amf_id).and_then(|e| e.linked_ue);
        if let Some(prev_ue) = prev_ue {
            if prev_ue != ue_id {
                if let Some(ue) = self.contexts.get_mut(&prev_ue) {
                    ue.core_amf_context_index = None;
                    ue.core_amf_info = None;
                }
            }
        }

        let Some(entry) = self.amf.entries.get_mut(&amf_id) else {
            return;
        };
        entry.linked_ue = Some(ue_id);
        entry.disassociated_at = None;
        let info = entry.info.clone();
        if let Some(ue) = self.contexts.get_mut(&ue_id) {
            ue.core_amf_context_index = Some(amf_id);
            ue.core_amf_info = Some(info);
        }
    }

    /// Try to link an AMF entry to the UE holding its NGAP id pair
    fn associate_amf_context_with_ue_ngap(&mut self, amf_id: AmfContextId) -> bool {
        let Some(entry) = self.amf.entries.get(&amf_id) else {
            return false;
        };
        let Some(ngap_ids) = entry.info.ngap_ids else {
            return false;
        };
        let Some(ue_id) =
            self.getid_by_ngap_ue_ids(ngap_ids.ran_ue_ngap_id, ngap_ids.amf_ue_ngap_id)
        else {
            return false;
        };
        self.link_amf_entry_to_ue(amf_id, ue_id);
        true
    }

    /// Try to link an AMF entry to the UE holding its TMSI (current GUTI
    /// first, then next GUTI)
    fn associate_amf_context_with_ue_tmsi(&mut self, amf_id: AmfContextId) -> bool {
        let Some(entry) = self.amf.entries.get(&amf_id) else {
            return false;
        };
        let gutis = [entry.info.current_guti.clone(), entry.info.next_guti.clone()];
        for guti in gutis.into_iter().flatten() {
            if let Some(ue_id) = self.getid_by_tmsi(guti.mtmsi) {
                self.link_amf_entry_to_ue(amf_id, ue_id);
                return true;
            }
        }
        false
    }

    /// UE-side trigger: the UE just learned its NGAP ids, look for the
    /// matching AMF entry
    pub(crate) fn associate_ue_context_with_amf_ngap(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.get(&ue_id) else {
            return;
        };
        let Some(ngap_ids) = ue.ngap_ids else {
            return;
        };
        let Some(amf_id) = self.amf.get_amfid_by_ngap_ids(&ngap_ids) else {
            return;
        };
        self.link_amf_entry_to_ue(amf_id, ue_id);
    }

    /// UE-side trigger: the UE just learned its TMSI, look for the matching
    /// AMF entry
    pub(crate) fn associate_ue_context_with_amf_tmsi(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.get(&ue_id) else {
            return;
        };
        let Some(tmsi) = ue.tmsi else {
            return;
        };
        let Some(amf_id) = self.amf.get_amfid_by_tmsi(tmsi) else {
            return;
        };
        self.link_amf_entry_to_ue(amf_id, ue_id);
    }

    /// Sever the link between a UE and its AMF entry; the entry is kept
    /// with its retention clock started.
    pub fn disassociate_amf_context_with_ue(&mut self, ue_id: UeContextId) {
        let Some(ue) = self.contexts.get_mut(&ue_id) else {
            return;
        };
        let Some(amf_id) = ue.core_amf_context_index.take() else {
            return;
        };
        log::debug!(
            "disassociate_amf_context_with_ue: ue_id={} amf_id={}",
            ue_id, amf_id
        );
        ue.core_amf_info = None;
        self.amf.detach(amf_id, self.now);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoreCgi, CoreGuti, CoreTai, NgapProcedure};
    use std::time::Duration;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    fn core_info(ngap_ran: Option<u64>, ngap_amf: Option<u64>) -> CoreAmfInfo {
        CoreAmfInfo {
            suci: Some("suci-0-001-01-0000-0-0-1230010004".to_string()),
            supi: Some("imsi-001011230010004".to_string()),
            home_plmn_id: Some("001F01".to_string()),
            current_guti: Some(CoreGuti {
                plmn_id: "999F99".to_string(),
                amf_id: "20040".to_string(),
                mtmsi: 3221226075,
            }),
            next_guti: Some(CoreGuti {
                plmn_id: "999F99".to_string(),
                amf_id: "20040".to_string(),
                mtmsi: 3221225666,
            }),
            tai: Some(CoreTai {
                plmn_id: "00f110".to_string(),
                tac: "1".to_string(),
            }),
            cgi: Some(CoreCgi {
                plmn_id: "00f110".to_string(),
                cell_id: "66c000".to_string(),
            }),
            ngap_ids: ngap_ran.map(|ran| RanNgapUeIds {
                ran_ue_ngap_id: Some(ran),
                amf_ue_ngap_id: ngap_amf,
            }),
        }
    }

    /// DU + CU-CP UE with a completed NGAP procedure carrying these ids
    fn add_ue_with_ngap(s: &mut UeContextMap, crnti: u16, ran: u64, amf: u64) -> UeContextId {
        let cucp_index = u32::from(crnti) - 20000;
        s.hook_du_ue_ctx_creation("du1", cucp_index, 101, 400, crnti, 12, 201, t0());
        s.hook_cucp_uemgr_ue_add("cucp1", cucp_index, 101, 400, crnti, t0());
        s.hook_ngap_procedure_completed(
            "cucp1",
            cucp_index,
            NgapProcedure::InitialContextSetup,
            true,
            Some(ran),
            Some(amf),
            t0(),
        );
        s.getid_by_cucp_index("cucp1", cucp_index).unwrap()
    }

    #[test]
    fn test_core_info_without_identity_is_ignored() {
        let mut s = UeContextMap::new();
        let info = CoreAmfInfo {
            ngap_ids: Some(RanNgapUeIds {
                ran_ue_ngap_id: Some(1),
                amf_ue_ngap_id: Some(2),
            }),
            ..Default::default()
        };
        s.hook_core_amf_info(info, t0());
        assert_eq!(s.get_num_amf_contexts(), 0);
    }

    #[test]
    fn test_core_info_mismatched_ngap_not_associated() {
        let mut s = UeContextMap::new();
        let ue_id = add_ue_with_ngap(&mut s, 20000, 5000, 15000);

        s.hook_core_amf_info(core_info(Some(1234), Some(4321)), t0());
        assert_eq!(s.get_num_amf_contexts(), 1);
        assert!(s.getuectx(ue_id).unwrap().core_amf_info.is_none());
    }

    #[test]
    fn test_core_info_matching_ngap_associates() {
        let mut s = UeContextMap::new();
        let ue_id = add_ue_with_ngap(&mut s, 20000, 5000, 15000);

        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());
        assert_eq!(s.get_num_amf_contexts(), 1);

        let ue = s.getuectx(ue_id).unwrap();
        let amf_id = ue.core_amf_context_index.unwrap();
        assert_eq!(
            ue.core_amf_info.as_ref().unwrap().supi.as_deref(),
            Some("imsi-001011230010004")
        );
        let entry = s.amf_entry(amf_id).unwrap();
        assert_eq!(entry.linked_ue, Some(ue_id));
        assert_eq!(entry.disassociated_at, None);
    }

    #[test]
    fn test_core_info_update_reuses_entry() {
        let mut s = UeContextMap::new();
        let ue_id = add_ue_with_ngap(&mut s, 20000, 5000, 15000);

        // first report misses the NGAP ids, second matches: same entry
        s.hook_core_amf_info(core_info(Some(1234), Some(4321)), t0());
        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());
        assert_eq!(s.get_num_amf_contexts(), 1);
        assert_eq!(
            s.getuectx(ue_id).unwrap().core_amf_context_index,
            Some(0)
        );
    }

    #[test]
    fn test_remove_ran_disassociates_but_keeps_entry() {
        let mut s = UeContextMap::new();
        let ue_id = add_ue_with_ngap(&mut s, 20000, 5000, 15000);
        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());

        s.hook_core_amf_info_remove_ran(core_info(None, None), t0());
        assert_eq!(s.get_num_amf_contexts(), 1);
        let ue = s.getuectx(ue_id).unwrap();
        assert_eq!(ue.core_amf_context_index, None);
        assert!(ue.core_amf_info.is_none());
        let entry = s.amf_entry(0).unwrap();
        assert_eq!(entry.linked_ue, None);
        assert!(entry.disassociated_at.is_some());
    }

    #[test]
    fn test_ue_deletion_disassociates_entry() {
        let mut s = UeContextMap::new();
        let ue_id = add_ue_with_ngap(&mut s, 20000, 5000, 15000);
        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());

        s.hook_du_ue_ctx_deletion("du1", 0, t0());
        s.hook_cucp_uemgr_ue_remove("cucp1", 0, t0());
        assert!(s.getuectx(ue_id).is_none());
        assert_eq!(s.get_num_amf_contexts(), 1);
        assert_eq!(s.amf_entry(0).unwrap().linked_ue, None);
    }

    #[test]
    fn test_tmsi_correlation_after_core_info() {
        let mut s = UeContextMap::new();
        // AMF record arrives first, with no matching NGAP ids
        s.hook_core_amf_info(core_info(Some(1234), Some(4321)), t0());
        assert_eq!(s.get_num_amf_contexts(), 1);

        // UE appears and learns the next-GUTI TMSI: correlation by TMSI
        s.hook_du_ue_ctx_creation("du1", 0, 101, 400, 20000, 12, 201, t0());
        s.hook_cucp_uemgr_ue_add("cucp1", 0, 101, 400, 20000, t0());
        s.add_tmsi("cucp1", 0, 3221225666, t0());

        let ue_id = s.getid_by_cucp_index("cucp1", 0).unwrap();
        let ue = s.getuectx(ue_id).unwrap();
        assert_eq!(ue.tmsi, Some(3221225666));
        assert_eq!(ue.core_amf_context_index, Some(0));
        assert_eq!(s.amf_entry(0).unwrap().linked_ue, Some(ue_id));
        assert_eq!(s.get_amfid_by_tmsi(3221225666), Some(0));
    }

    #[test]
    fn test_add_tmsi_unknown_cucp_index_is_noop() {
        let mut s = UeContextMap::new();
        s.hook_cucp_uemgr_ue_add("cucp1", 1, 101, 400, 20000, t0());
        s.add_tmsi("cucp1", 0, 1234, t0());
        let ue_id = s.getid_by_cucp_index("cucp1", 1).unwrap();
        assert_eq!(s.getuectx(ue_id).unwrap().tmsi, None);
    }

    #[test]
    fn test_one_to_one_link_moves_between_ues() {
        let mut s = UeContextMap::new();
        let a = add_ue_with_ngap(&mut s, 20000, 5000, 15000);
        let b = add_ue_with_ngap(&mut s, 20001, 5001, 15001);

        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());
        assert_eq!(s.amf_entry(0).unwrap().linked_ue, Some(a));

        // the same core identity re-reports with UE b's NGAP ids: the link
        // moves, it is never duplicated
        s.hook_core_amf_info(core_info(Some(5001), Some(15001)), t0());
        assert_eq!(s.get_num_amf_contexts(), 1);
        assert_eq!(s.amf_entry(0).unwrap().linked_ue, Some(b));
        assert_eq!(s.getuectx(a).unwrap().core_amf_context_index, None);
        assert_eq!(s.getuectx(b).unwrap().core_amf_context_index, Some(0));
    }

    #[test]
    fn test_identity_priority_suci_wins() {
        let mut s = UeContextMap::new();
        s.hook_core_amf_info(core_info(None, None), t0());

        // same SUCI, different GUTIs: matches the existing entry by SUCI
        let mut update = core_info(None, None);
        update.current_guti.as_mut().unwrap().mtmsi = 1;
        update.next_guti.as_mut().unwrap().mtmsi = 2;
        s.hook_core_amf_info(update, t0());
        assert_eq!(s.get_num_amf_contexts(), 1);
        assert_eq!(
            s.amf_entry(0).unwrap().info.current_guti.as_ref().unwrap().mtmsi,
            1
        );
    }

    #[test]
    fn test_timeout_gc_boundary() {
        let mut s = UeContextMap::new();
        let _ue = add_ue_with_ngap(&mut s, 20000, 5000, 15000);
        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());

        // tear the UE down at t0: the entry is disassociated, not deleted
        s.hook_du_ue_ctx_deletion("du1", 0, t0());
        s.hook_cucp_uemgr_ue_remove("cucp1", 0, t0());
        assert_eq!(s.get_num_amf_contexts(), 1);

        s.process_timeout(t0() + Duration::from_secs(100));
        assert_eq!(s.get_num_amf_contexts(), 1);

        s.process_timeout(t0() + Duration::from_secs(21599));
        assert_eq!(s.get_num_amf_contexts(), 1);

        s.process_timeout(t0() + Duration::from_secs(21600));
        assert_eq!(s.get_num_amf_contexts(), 0);
    }

    #[test]
    fn test_reassociation_stops_retention_clock() {
        let mut s = UeContextMap::new();
        let _ue = add_ue_with_ngap(&mut s, 20000, 5000, 15000);
        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());

        s.hook_du_ue_ctx_deletion("du1", 0, t0());
        s.hook_cucp_uemgr_ue_remove("cucp1", 0, t0());
        assert!(s.amf_entry(0).unwrap().disassociated_at.is_some());

        // the UE re-registers and the core re-reports before the timeout
        let _ue2 = add_ue_with_ngap(&mut s, 20000, 5000, 15000);
        s.hook_core_amf_info(core_info(Some(5000), Some(15000)), t0());
        assert_eq!(s.get_num_amf_contexts(), 1);
        assert!(s.amf_entry(0).unwrap().disassociated_at.is_none());

        s.process_timeout(t0() + Duration::from_secs(21600));
        assert_eq!(s.get_num_amf_contexts(), 1);
    }
}
