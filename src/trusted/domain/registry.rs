use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bitcoin::{Address, Amount, Network, OutPoint, Transaction};

use crate::error::{BroadcastError, RebindError};
use crate::trusted::domain::request::{CycleId, TransactionType, TrustedBroadcastRequest};
use crate::trusted::engine::gate;

/// Opaque handle to a registered request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(usize);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a request stands across polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Registered, height not reached yet.
    Pending,
    /// Height reached, no coin bound yet.
    Eligible,
    /// A coin was bound but the transaction has not been accepted for relay.
    Resolved,
    /// At least one rebound transaction was accepted and none is waiting.
    Transmitted,
}

/// A registered request plus the per-coin bookkeeping of the service.
#[derive(Debug)]
pub struct BroadcastRecord {
    pub cycle: CycleId,
    pub transaction_type: TransactionType,
    request: Arc<TrustedBroadcastRequest>,

    /// outpoint -> rebound transaction still waiting for a successful submit
    resolved: BTreeMap<OutPoint, Transaction>,

    /// outpoints whose rebound transaction was accepted
    transmitted: BTreeSet<OutPoint>,

    /// outpoints that can never produce a valid transaction
    anomalies: BTreeMap<OutPoint, RebindError>,
}

impl BroadcastRecord {
    fn new(cycle: CycleId, transaction_type: TransactionType, request: TrustedBroadcastRequest) -> Self {
        Self {
            cycle,
            transaction_type,
            request: Arc::new(request),
            resolved: BTreeMap::new(),
            transmitted: BTreeSet::new(),
            anomalies: BTreeMap::new(),
        }
    }

    pub fn request(&self) -> &Arc<TrustedBroadcastRequest> {
        &self.request
    }

    pub fn state(&self, current_height: u32) -> RequestState {
        if !self.resolved.is_empty() {
            RequestState::Resolved
        } else if !self.transmitted.is_empty() {
            RequestState::Transmitted
        } else if gate::eligible(&self.request, current_height) {
            RequestState::Eligible
        } else {
            RequestState::Pending
        }
    }

    /// Whether the coin needs no further work.
    pub fn is_settled(&self, outpoint: &OutPoint) -> bool {
        self.transmitted.contains(outpoint) || self.anomalies.contains_key(outpoint)
    }

    pub fn rebound(&self, outpoint: &OutPoint) -> Option<&Transaction> {
        self.resolved.get(outpoint)
    }

    pub fn transmitted(&self) -> impl Iterator<Item = &OutPoint> {
        self.transmitted.iter()
    }

    pub fn anomalies(&self) -> impl Iterator<Item = (&OutPoint, &RebindError)> {
        self.anomalies.iter()
    }

    pub(crate) fn mark_resolved(&mut self, outpoint: OutPoint, tx: Transaction) {
        self.resolved.insert(outpoint, tx);
    }

    pub(crate) fn mark_transmitted(&mut self, outpoint: OutPoint) {
        self.resolved.remove(&outpoint);
        self.transmitted.insert(outpoint);
    }

    pub(crate) fn flag_anomaly(&mut self, outpoint: OutPoint, error: RebindError) {
        self.resolved.remove(&outpoint);
        self.anomalies.insert(outpoint, error);
    }
}

/// Checks that a request can be watched and rebound at all.
pub fn validate_request(request: &TrustedBroadcastRequest, network: Network) -> Result<(), BroadcastError> {
    let script = &request.watched_script;

    if Address::from_script(script, network).is_err() {
        return Err(BroadcastError::InvalidRequest(format!(
            "script {} has no address on {}",
            script, network
        )));
    }

    let template = &request.template;
    if template.transaction.input.is_empty() {
        return Err(BroadcastError::InvalidRequest("template has no input".into()));
    }

    match template.required_value() {
        Some(required) if required <= Amount::MAX_MONEY => {}
        _ => {
            return Err(BroadcastError::InvalidRequest(
                "template outputs plus fee exceed the money supply".into(),
            ))
        }
    }

    match template.spend.locking_script(&template.signer) {
        Some(spk) if spk == *script => Ok(()),
        Some(_) => Err(BroadcastError::InvalidRequest(format!(
            "spend path of {} does not unlock {}",
            template.signer, script
        ))),
        None => Err(BroadcastError::InvalidRequest(format!(
            "key {} cannot sign a {:?} input",
            template.signer, template.spend
        ))),
    }
}

/// Append-only, insertion-ordered arena of broadcast requests.
#[derive(Debug)]
pub struct BroadcastRegistry {
    network: Network,
    records: Vec<BroadcastRecord>,
}

impl BroadcastRegistry {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            records: Vec::new(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Validates and appends a request.
    pub fn register(
        &mut self,
        cycle: CycleId,
        transaction_type: TransactionType,
        request: TrustedBroadcastRequest,
    ) -> Result<RequestId, BroadcastError> {
        validate_request(&request, self.network)?;

        let id = RequestId(self.records.len());
        self.records
            .push(BroadcastRecord::new(cycle, transaction_type, request));
        log::debug!("[REGISTRY] registered {} ({} / cycle {})", id, transaction_type, cycle);
        Ok(id)
    }

    /// All registered requests in insertion order. Calling again restarts from the first.
    pub fn pending(&self) -> impl Iterator<Item = (RequestId, &BroadcastRecord)> + '_ {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (RequestId(i), r))
    }

    pub fn get(&self, id: RequestId) -> Option<&BroadcastRecord> {
        self.records.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: RequestId) -> Option<&mut BroadcastRecord> {
        self.records.get_mut(id.0)
    }

    /// Requests registered for the given cycle and role.
    pub fn find(
        &self,
        cycle: CycleId,
        transaction_type: TransactionType,
    ) -> impl Iterator<Item = RequestId> + '_ {
        self.pending()
            .filter(move |(_, r)| r.cycle == cycle && r.transaction_type == transaction_type)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
