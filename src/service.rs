//! Service layer API for approval workflow operations.
//!
//! [`ApprovalService`] owns the request state machine: creation and
//! accumulation of requests, level advancement against cumulative thresholds,
//! and the approval/rejection transitions. Workflow and step record
//! management lives here too, since the engine reads both.

use crate::condition::{self, ApprovalType, StepConditions};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::request::{Request, RequestStatus};
use crate::store::{ApprovalStore, RequestTx, abort};
use crate::utils;
use crate::workflow::{Step, TimeStamp, Workflow};
use sled::transaction::ConflictableTransactionResult;
use std::cmp::Reverse;
use tracing::{debug, info};

pub struct ApprovalService {
    store: ApprovalStore,
    config: Config,
}

impl ApprovalService {
    pub fn new(store: ApprovalStore, config: Config) -> Self {
        Self { store, config }
    }

    /// Open the sled database named by the configuration and build a service
    /// on top of it.
    pub fn open(config: Config) -> Result<Self> {
        let store = ApprovalStore::open(&config)?;
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &ApprovalStore {
        &self.store
    }

    /// Flush dirty buffers to disk. sled persists asynchronously, so call
    /// this before tearing the service down when durability matters.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    // --- workflow management ---

    pub fn create_workflow(&self, name: &str) -> Result<Workflow> {
        if name.trim().is_empty() {
            return Err(Error::EmptyWorkflowName);
        }
        let workflow = Workflow::new(name.to_string())?;
        self.store.create_workflow(&workflow)?;
        info!(workflow_id = %workflow.id, name, "workflow created");
        Ok(workflow)
    }

    pub fn get_workflow(&self, id: &str) -> Result<Workflow> {
        self.store
            .workflow(id)?
            .ok_or_else(|| Error::not_found("workflow", id))
    }

    pub fn get_workflow_by_name(&self, name: &str) -> Result<Workflow> {
        self.store
            .workflow_by_name(name)?
            .ok_or_else(|| Error::not_found("workflow", name))
    }

    pub fn find_all_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows = self.store.workflows()?;
        workflows.sort_by_key(|w| Reverse(w.created_at.to_datetime_utc()));
        Ok(workflows)
    }

    /// Newest-first page of workflows, optionally filtered by a name fragment.
    pub fn find_workflows(
        &self,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> Result<(Vec<Workflow>, u64)> {
        let mut workflows = self.store.workflows()?;
        if let Some(needle) = search {
            workflows.retain(|w| w.name.contains(needle));
        }
        workflows.sort_by_key(|w| Reverse(w.created_at.to_datetime_utc()));
        Ok(self.paginate(workflows, page, page_size))
    }

    // --- step management ---

    /// Create a step at the next free level of a workflow. Levels are
    /// assigned densely: the new step lands at max(existing level) + 1.
    pub fn create_step(
        &self,
        workflow_id: &str,
        actor: &str,
        conditions: Option<StepConditions>,
    ) -> Result<Step> {
        self.get_workflow(workflow_id)?;
        let level = self.store.max_level(workflow_id)? + 1;
        let payload = match conditions {
            Some(ref c) => condition::encode(c)?,
            None => Vec::new(),
        };
        let step = Step::new(workflow_id.to_string(), level, actor.to_string(), payload)?;
        self.store.create_step(&step)?;
        debug!(step_id = %step.id, workflow_id, level, "step created");
        Ok(step)
    }

    pub fn get_step(&self, id: &str) -> Result<Step> {
        self.store
            .step_by_id(id)?
            .ok_or_else(|| Error::not_found("step", id))
    }

    /// Steps of a workflow ordered by level.
    pub fn find_steps(&self, workflow_id: &str) -> Result<Vec<Step>> {
        self.store.steps_for_workflow(workflow_id)
    }

    /// Level-ordered page of a workflow's steps, optionally filtered by an
    /// actor fragment.
    pub fn find_steps_paginated(
        &self,
        workflow_id: &str,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> Result<(Vec<Step>, u64)> {
        let mut steps = self.store.steps_for_workflow(workflow_id)?;
        if let Some(needle) = search {
            steps.retain(|s| s.actor.contains(needle));
        }
        Ok(self.paginate(steps, page, page_size))
    }

    pub fn update_step(
        &self,
        id: &str,
        level: u32,
        actor: &str,
        conditions: Option<StepConditions>,
    ) -> Result<Step> {
        if level == 0 {
            return Err(Error::InvalidLevel);
        }
        let before = self.get_step(id)?;
        let mut after = before.clone();
        after.level = level;
        after.actor = actor.to_string();
        after.conditions = match conditions {
            Some(ref c) => condition::encode(c)?,
            None => Vec::new(),
        };
        self.store.update_step(&before, &after)?;
        Ok(after)
    }

    /// Remove a step. Deleting an intermediate level leaves a gap that later
    /// surfaces as a not-found failure when the engine walks the levels.
    pub fn delete_step(&self, id: &str) -> Result<()> {
        let step = self.get_step(id)?;
        self.store.delete_step(&step)?;
        Ok(())
    }

    pub fn max_level(&self, workflow_id: &str) -> Result<u32> {
        self.store.max_level(workflow_id)
    }

    pub fn next_level(&self, workflow_id: &str) -> Result<u32> {
        Ok(self.store.max_level(workflow_id)? + 1)
    }

    // --- request state machine ---

    /// Submit an amount against a workflow. If a pending request already
    /// exists the amount folds into it; otherwise a new request opens at
    /// level 1. At most one level transition is evaluated per call, so a
    /// large submission still advances a single level at a time.
    pub fn create_request(&self, workflow_id: &str, amount: u64) -> Result<Request> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        self.get_workflow(workflow_id)?;
        // a workflow with no entry step cannot accept requests
        self.store
            .step(workflow_id, 1)?
            .ok_or_else(|| Error::not_found("step", format!("{workflow_id}/1")))?;

        let request_id = utils::new_uuid_to_bech32(utils::REQUEST_HRP)?;
        let created_at = TimeStamp::new();

        let request = self.store.request_transaction(|tx| {
            match tx.pending_request_id(workflow_id)? {
                Some(pending_id) => {
                    let mut request = tx
                        .request(&pending_id)?
                        .ok_or_else(|| abort(Error::not_found("request", pending_id.clone())))?;
                    request.amount = request
                        .amount
                        .checked_add(amount)
                        .ok_or_else(|| abort(Error::AmountOverflow))?;
                    advance_one_level(tx, &mut request)?;
                    tx.save_request(&request)?;
                    Ok(request)
                }
                None => {
                    let mut request = Request::new(
                        request_id.clone(),
                        workflow_id.to_string(),
                        amount,
                        created_at.clone(),
                    );
                    advance_one_level(tx, &mut request)?;
                    tx.save_request(&request)?;
                    Ok(request)
                }
            }
        })?;

        match request.status {
            RequestStatus::Approved => {
                info!(
                    request_id = %request.id,
                    workflow_id,
                    amount = request.amount,
                    "request approved on submission"
                );
            }
            _ => {
                info!(
                    request_id = %request.id,
                    workflow_id,
                    amount = request.amount,
                    current_step = request.current_step,
                    "request pending"
                );
            }
        }
        Ok(request)
    }

    pub fn get_request(&self, id: &str) -> Result<Request> {
        self.store
            .request(id)?
            .ok_or_else(|| Error::not_found("request", id))
    }

    /// Newest-first page of requests, optionally filtered by workflow and
    /// status. Pure read; no state machine logic.
    pub fn find_all_requests(
        &self,
        page: usize,
        page_size: usize,
        workflow_id: Option<&str>,
        status: Option<RequestStatus>,
    ) -> Result<(Vec<Request>, u64)> {
        let mut requests = self.store.requests()?;
        if let Some(workflow_id) = workflow_id {
            requests.retain(|r| r.workflow_id == workflow_id);
        }
        if let Some(status) = status {
            requests.retain(|r| r.status == status);
        }
        requests.sort_by_key(|r| Reverse(r.created_at.to_datetime_utc()));
        Ok(self.paginate(requests, page, page_size))
    }

    /// Approve a pending request. Runs as a single serializable transaction
    /// spanning the status check, the step and threshold reads, and the
    /// write-back, so racing approvals (or an approval racing a reject)
    /// cannot both observe a pending request.
    pub fn approve_request(&self, id: &str) -> Result<Request> {
        let request = self.store.request_transaction(|tx| {
            let mut request = tx
                .request(id)?
                .ok_or_else(|| abort(Error::not_found("request", id)))?;
            if request.status != RequestStatus::Pending {
                return Err(abort(Error::InvalidState));
            }
            let step = tx
                .step(&request.workflow_id, request.current_step)?
                .ok_or_else(|| {
                    abort(Error::not_found(
                        "step",
                        format!("{}/{}", request.workflow_id, request.current_step),
                    ))
                })?;
            let conditions = condition::decode(&step.conditions).map_err(abort)?;

            if conditions.approval_type == ApprovalType::Api {
                let threshold =
                    accumulated_min_amount_tx(tx, &request.workflow_id, request.current_step)?;
                if request.amount < threshold {
                    // below the cumulative threshold: a successful no-op,
                    // not an error, and nothing is written
                    return Ok(request);
                }
            }

            request.status = RequestStatus::Approved;
            tx.save_request(&request)?;
            Ok(request)
        })?;

        if request.status == RequestStatus::Approved {
            info!(request_id = %request.id, "request approved");
        } else {
            debug!(request_id = %request.id, "approval below threshold, request left pending");
        }
        Ok(request)
    }

    /// Reject a pending request. Terminal; no threshold logic involved.
    pub fn reject_request(&self, id: &str) -> Result<Request> {
        let request = self.store.request_transaction(|tx| {
            let mut request = tx
                .request(id)?
                .ok_or_else(|| abort(Error::not_found("request", id)))?;
            if request.status != RequestStatus::Pending {
                return Err(abort(Error::InvalidState));
            }
            request.status = RequestStatus::Rejected;
            tx.save_request(&request)?;
            Ok(request)
        })?;

        info!(request_id = %request.id, "request rejected");
        Ok(request)
    }

    /// Cumulative minimum amount required to clear levels 1..=level.
    pub fn accumulated_min_amount(&self, workflow_id: &str, level: u32) -> Result<u64> {
        self.store
            .request_transaction(|tx| accumulated_min_amount_tx(tx, workflow_id, level))
    }

    fn paginate<T>(&self, items: Vec<T>, page: usize, page_size: usize) -> (Vec<T>, u64) {
        let total = items.len() as u64;
        let page_size = if page_size == 0 {
            self.config.default_page_size
        } else {
            page_size
        };
        let offset = page.saturating_sub(1).saturating_mul(page_size);
        let page_items = items.into_iter().skip(offset).take(page_size).collect();
        (page_items, total)
    }
}

/// Evaluate a single level transition for a request whose amount was just set
/// or increased: when the cumulative threshold at the current level is met,
/// advance one level if a next step exists, otherwise approve outright. The
/// final-level approval is unconditional and ignores that step's approval
/// mode.
fn advance_one_level(
    tx: &RequestTx<'_>,
    request: &mut Request,
) -> ConflictableTransactionResult<(), Error> {
    let threshold = accumulated_min_amount_tx(tx, &request.workflow_id, request.current_step)?;
    if request.amount < threshold {
        return Ok(());
    }
    match tx.step(&request.workflow_id, request.current_step + 1)? {
        Some(_) => request.current_step += 1,
        None => request.status = RequestStatus::Approved,
    }
    Ok(())
}

/// Sum of `min_amount` over step levels 1..=level of a workflow, always
/// measured from level 1. A missing intermediate level is a hard failure,
/// never treated as zero.
fn accumulated_min_amount_tx(
    tx: &RequestTx<'_>,
    workflow_id: &str,
    level: u32,
) -> ConflictableTransactionResult<u64, Error> {
    let mut total = 0u64;
    for current in 1..=level {
        let step = tx
            .step(workflow_id, current)?
            .ok_or_else(|| abort(Error::not_found("step", format!("{workflow_id}/{current}"))))?;
        let min = condition::min_amount(&step.conditions).map_err(abort)?;
        total = total
            .checked_add(min)
            .ok_or_else(|| abort(Error::AmountOverflow))?;
    }
    Ok(total)
}
