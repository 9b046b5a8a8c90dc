//! sled-backed storage for workflows, steps and requests.
//!
//! All request mutation happens through [`ApprovalStore::request_transaction`],
//! a serializable transaction over the request and step trees. sled retries
//! the closure on conflict, which stands in for a row-level exclusive lock:
//! two racing mutations of the same request cannot both commit against the
//! same observed state.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::request::{Request, RequestStatus};
use crate::workflow::{Step, Workflow};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;

/// Reserved key prefix inside the requests tree for the pending-request
/// index (workflow id -> request id). Request ids are bech32 strings with
/// the `req` HRP, so the prefix cannot collide with a record key.
const PENDING_PREFIX: &[u8] = b"pending/";

pub struct ApprovalStore {
    db: Arc<Db>,
    workflows: Tree,
    workflow_names: Tree,
    steps: Tree,
    step_ids: Tree,
    requests: Tree,
}

/// Transactional view over the request and step trees, handed to closures
/// passed to [`ApprovalStore::request_transaction`].
pub struct RequestTx<'a> {
    requests: &'a TransactionalTree,
    steps: &'a TransactionalTree,
}

pub(crate) fn abort(error: Error) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(error)
}

fn step_key(workflow_id: &str, level: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(workflow_id.len() + 5);
    key.extend_from_slice(workflow_id.as_bytes());
    key.push(b'/');
    key.extend_from_slice(&level.to_be_bytes());
    key
}

fn step_prefix(workflow_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(workflow_id.len() + 1);
    prefix.extend_from_slice(workflow_id.as_bytes());
    prefix.push(b'/');
    prefix
}

fn pending_key(workflow_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PENDING_PREFIX.len() + workflow_id.len());
    key.extend_from_slice(PENDING_PREFIX);
    key.extend_from_slice(workflow_id.as_bytes());
    key
}

fn encode_record<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
}

fn decode_record<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T> {
    Ok(minicbor::decode(bytes)?)
}

impl ApprovalStore {
    /// Open the sled database named by the configuration.
    pub fn open(config: &Config) -> Result<Self> {
        let db = sled::open(&config.db_path)?;
        Self::new(Arc::new(db))
    }

    pub fn new(db: Arc<Db>) -> Result<Self> {
        let workflows = db.open_tree("workflows")?;
        let workflow_names = db.open_tree("workflow_names")?;
        let steps = db.open_tree("steps")?;
        let step_ids = db.open_tree("step_ids")?;
        let requests = db.open_tree("requests")?;
        Ok(Self {
            db,
            workflows,
            workflow_names,
            steps,
            step_ids,
            requests,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- workflows ---

    /// Insert a workflow, claiming its name atomically. The name index
    /// compare-and-swap is what enforces uniqueness under concurrent creates.
    pub fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
        let bytes = encode_record(workflow)?;
        let claimed = self.workflow_names.compare_and_swap(
            workflow.name.as_bytes(),
            None as Option<&[u8]>,
            Some(workflow.id.as_bytes()),
        )?;
        if claimed.is_err() {
            return Err(Error::WorkflowNameExists);
        }
        if let Err(error) = self.workflows.insert(workflow.id.as_bytes(), bytes) {
            // release the claimed name rather than leave it pointing at
            // a record that was never written
            let _ = self.workflow_names.remove(workflow.name.as_bytes());
            return Err(error.into());
        }
        Ok(())
    }

    pub fn workflow(&self, id: &str) -> Result<Option<Workflow>> {
        match self.workflows.get(id.as_bytes())? {
            Some(bytes) => decode_record(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn workflow_by_name(&self, name: &str) -> Result<Option<Workflow>> {
        match self.workflow_names.get(name.as_bytes())? {
            Some(id) => {
                let id =
                    String::from_utf8(id.to_vec()).map_err(|e| Error::Internal(e.to_string()))?;
                self.workflow(&id)
            }
            None => Ok(None),
        }
    }

    pub fn workflows(&self) -> Result<Vec<Workflow>> {
        let mut out = Vec::new();
        for entry in self.workflows.iter() {
            let (_, bytes) = entry?;
            out.push(decode_record(&bytes)?);
        }
        Ok(out)
    }

    // --- steps ---

    pub fn create_step(&self, step: &Step) -> Result<()> {
        let key = step_key(&step.workflow_id, step.level);
        self.steps.insert(key.clone(), encode_record(step)?)?;
        self.step_ids.insert(step.id.as_bytes(), key)?;
        Ok(())
    }

    pub fn step(&self, workflow_id: &str, level: u32) -> Result<Option<Step>> {
        match self.steps.get(step_key(workflow_id, level))? {
            Some(bytes) => decode_record(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn step_by_id(&self, id: &str) -> Result<Option<Step>> {
        match self.step_ids.get(id.as_bytes())? {
            Some(key) => match self.steps.get(key)? {
                Some(bytes) => decode_record(&bytes).map(Some),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Steps of a workflow, ordered by level (the composite key sorts by
    /// level big-endian within a workflow prefix).
    pub fn steps_for_workflow(&self, workflow_id: &str) -> Result<Vec<Step>> {
        let mut out = Vec::new();
        for entry in self.steps.scan_prefix(step_prefix(workflow_id)) {
            let (_, bytes) = entry?;
            out.push(decode_record(&bytes)?);
        }
        Ok(out)
    }

    /// Highest assigned level for a workflow, 0 when it has no steps.
    pub fn max_level(&self, workflow_id: &str) -> Result<u32> {
        Ok(self
            .steps_for_workflow(workflow_id)?
            .iter()
            .map(|s| s.level)
            .max()
            .unwrap_or(0))
    }

    /// Replace a step, moving it between level keys when the level changed.
    /// A move onto a level another step occupies is refused; the keyed store
    /// cannot hold two steps at one level.
    pub fn update_step(&self, before: &Step, after: &Step) -> Result<()> {
        if before.level != after.level {
            if self
                .steps
                .get(step_key(&after.workflow_id, after.level))?
                .is_some()
            {
                return Err(Error::LevelOccupied(after.level));
            }
            self.steps
                .remove(step_key(&before.workflow_id, before.level))?;
        }
        let key = step_key(&after.workflow_id, after.level);
        self.steps.insert(key.clone(), encode_record(after)?)?;
        self.step_ids.insert(after.id.as_bytes(), key)?;
        Ok(())
    }

    pub fn delete_step(&self, step: &Step) -> Result<()> {
        self.steps.remove(step_key(&step.workflow_id, step.level))?;
        self.step_ids.remove(step.id.as_bytes())?;
        Ok(())
    }

    // --- requests ---

    pub fn request(&self, id: &str) -> Result<Option<Request>> {
        match self.requests.get(id.as_bytes())? {
            Some(bytes) => decode_record(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn requests(&self) -> Result<Vec<Request>> {
        let mut out = Vec::new();
        for entry in self.requests.iter() {
            let (key, bytes) = entry?;
            if key.starts_with(PENDING_PREFIX) {
                continue;
            }
            out.push(decode_record(&bytes)?);
        }
        Ok(out)
    }

    /// Run `f` as a serializable transaction over the request and step trees.
    /// Domain failures abort the transaction and surface as [`Error`]; sled
    /// retries the closure on write conflicts, so it must be free of side
    /// effects beyond the transactional view.
    pub fn request_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&RequestTx<'_>) -> ConflictableTransactionResult<T, Error>,
    {
        let outcome = (&self.requests, &self.steps).transaction(|(requests, steps)| {
            let tx = RequestTx { requests, steps };
            f(&tx)
        });
        match outcome {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(error)) => Err(error),
            Err(TransactionError::Storage(error)) => Err(Error::Storage(error)),
        }
    }
}

impl RequestTx<'_> {
    pub fn request(&self, id: &str) -> ConflictableTransactionResult<Option<Request>, Error> {
        match self.requests.get(id.as_bytes())? {
            Some(bytes) => decode_record(&bytes).map(Some).map_err(abort),
            None => Ok(None),
        }
    }

    pub fn step(
        &self,
        workflow_id: &str,
        level: u32,
    ) -> ConflictableTransactionResult<Option<Step>, Error> {
        match self.steps.get(step_key(workflow_id, level))? {
            Some(bytes) => decode_record(&bytes).map(Some).map_err(abort),
            None => Ok(None),
        }
    }

    /// The sole pending request id for a workflow, if one exists.
    pub fn pending_request_id(
        &self,
        workflow_id: &str,
    ) -> ConflictableTransactionResult<Option<String>, Error> {
        match self.requests.get(pending_key(workflow_id))? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| abort(Error::Internal(e.to_string()))),
            None => Ok(None),
        }
    }

    /// Persist a request and keep the pending index in step with its status:
    /// a pending request is indexed under its workflow, a terminal one is
    /// de-indexed in the same transaction.
    pub fn save_request(&self, request: &Request) -> ConflictableTransactionResult<(), Error> {
        let bytes = encode_record(request).map_err(abort)?;
        self.requests.insert(request.id.as_bytes(), bytes)?;
        if request.status == RequestStatus::Pending {
            self.requests
                .insert(pending_key(&request.workflow_id), request.id.as_bytes())?;
        } else {
            self.requests.remove(pending_key(&request.workflow_id))?;
        }
        Ok(())
    }
}
