//! End-to-end scenarios for the approval workflow engine.

use anyhow::Context;
use approval_flow::{
    condition::{ApprovalType, StepConditions},
    config::Config,
    error::Error,
    request::RequestStatus,
    service::ApprovalService,
};
use std::sync::Arc;
use tempfile::tempdir;

fn api(min_amount: u64) -> Option<StepConditions> {
    Some(StepConditions {
        min_amount,
        approval_type: ApprovalType::Api,
    })
}

fn manual(min_amount: u64) -> Option<StepConditions> {
    Some(StepConditions {
        min_amount,
        approval_type: ApprovalType::Manual,
    })
}

#[test]
fn single_step_request_approved_on_creation() -> anyhow::Result<()> {
    // Sled uses file-based locking to prevent concurrent access, so each test
    // gets its own database under a temp dir for simplified cleanup.
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("single_step.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("expense-approval")?;
    service.create_step(&workflow.id, "Manager", api(100))?;

    // amount at/above the threshold of the sole step approves immediately
    let request = service
        .create_request(&workflow.id, 150)
        .context("request failed on submit: ")?;

    assert_eq!(request.status, RequestStatus::Approved);
    assert_eq!(request.amount, 150);

    Ok(())
}

#[test]
fn single_step_request_below_threshold_stays_pending() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("below_threshold.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("expense-approval")?;
    service.create_step(&workflow.id, "Manager", api(100))?;

    let request = service.create_request(&workflow.id, 50)?;

    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.current_step, 1);
    assert_eq!(request.amount, 50);

    Ok(())
}

#[test]
fn submissions_accumulate_into_one_request() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("accumulate.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("purchasing")?;
    service.create_step(&workflow.id, "Manager", api(100))?;

    let first = service.create_request(&workflow.id, 40)?;
    assert_eq!(first.status, RequestStatus::Pending);

    // the second submission folds into the pending request rather than
    // opening a second one, and the combined amount clears the threshold
    let second = service.create_request(&workflow.id, 70)?;
    assert_eq!(second.id, first.id);
    assert_eq!(second.amount, 110);
    assert_eq!(second.status, RequestStatus::Approved);

    let (all, total) = service.find_all_requests(1, 10, Some(&workflow.id), None)?;
    assert_eq!(total, 1);
    assert_eq!(all.len(), 1);

    Ok(())
}

#[test]
fn multi_level_workflow_advances_one_level_per_submission() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("multi_level.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("capital-spend")?;
    service.create_step(&workflow.id, "Manager", api(100))?;
    service.create_step(&workflow.id, "Director", manual(200))?;

    // clears level 1 (100) but not the cumulative level-2 threshold (300)
    let request = service.create_request(&workflow.id, 150)?;
    assert_eq!(request.current_step, 2);
    assert_eq!(request.status, RequestStatus::Pending);

    // folding enough to clear the cumulative threshold at the final level
    // finalizes the request, regardless of the final step's approval mode
    let request = service.create_request(&workflow.id, 200)?;
    assert_eq!(request.amount, 350);
    assert_eq!(request.status, RequestStatus::Approved);

    Ok(())
}

#[test]
fn api_approval_below_threshold_is_a_successful_noop() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("api_noop.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("expenses")?;
    service.create_step(&workflow.id, "Manager", api(100))?;

    let request = service.create_request(&workflow.id, 50)?;
    assert_eq!(request.status, RequestStatus::Pending);

    // not an error: the request comes back unchanged, still pending
    let unchanged = service.approve_request(&request.id)?;
    assert_eq!(unchanged.status, RequestStatus::Pending);
    assert_eq!(unchanged.amount, 50);
    assert_eq!(unchanged.current_step, 1);

    Ok(())
}

#[test]
fn manual_step_approves_unconditionally() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("manual.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("legal-review")?;
    service.create_step(&workflow.id, "Counsel", manual(1_000))?;

    let request = service.create_request(&workflow.id, 50)?;
    assert_eq!(request.status, RequestStatus::Pending);

    // an explicit sign-off bypasses the amount gate entirely
    let approved = service.approve_request(&request.id)?;
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.amount, 50);

    Ok(())
}

#[test]
fn conditionless_step_approves_unconditionally() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("conditionless.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("petty-cash")?;
    service.create_step(&workflow.id, "Clerk", None)?;

    // a zero threshold means any submission approves at creation
    let request = service.create_request(&workflow.id, 1)?;
    assert_eq!(request.status, RequestStatus::Approved);

    Ok(())
}

#[test]
fn terminal_requests_are_immutable() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("terminal.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("travel")?;
    service.create_step(&workflow.id, "Manager", api(1_000))?;

    let request = service.create_request(&workflow.id, 100)?;
    let rejected = service.reject_request(&request.id)?;
    assert_eq!(rejected.status, RequestStatus::Rejected);

    // rejecting twice only succeeds once
    let err = service.reject_request(&request.id).unwrap_err();
    assert!(matches!(err, Error::InvalidState));

    // approval after rejection fails the same way
    let err = service.approve_request(&request.id).unwrap_err();
    assert!(matches!(err, Error::InvalidState));

    // and the stored record is untouched
    let stored = service.get_request(&request.id)?;
    assert_eq!(stored.status, RequestStatus::Rejected);
    assert_eq!(stored.amount, 100);

    Ok(())
}

#[test]
fn invalid_submissions_create_nothing() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("invalid.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("misc")?;
    service.create_step(&workflow.id, "Manager", api(10))?;

    let err = service.create_request(&workflow.id, 0).unwrap_err();
    assert!(matches!(err, Error::InvalidAmount));

    // a workflow without steps cannot accept requests
    let empty = service.create_workflow("empty")?;
    let err = service.create_request(&empty.id, 100).unwrap_err();
    assert!(err.is_not_found());

    // and an unknown workflow propagates not-found
    let err = service.create_request("wf1nosuch", 100).unwrap_err();
    assert!(err.is_not_found());

    let (_, total) = service.find_all_requests(1, 10, None, None)?;
    assert_eq!(total, 0);

    Ok(())
}

#[test]
fn request_listing_filters_and_pages() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("listing.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let first = service.create_workflow("first")?;
    service.create_step(&first.id, "Manager", api(1_000))?;
    let second = service.create_workflow("second")?;
    service.create_step(&second.id, "Manager", api(10))?;

    let pending = service.create_request(&first.id, 100)?;
    let approved = service.create_request(&second.id, 100)?;
    assert_eq!(pending.status, RequestStatus::Pending);
    assert_eq!(approved.status, RequestStatus::Approved);

    let (rows, total) = service.find_all_requests(1, 10, None, None)?;
    assert_eq!(total, 2);
    assert_eq!(rows.len(), 2);

    let (rows, total) =
        service.find_all_requests(1, 10, Some(&first.id), Some(RequestStatus::Pending))?;
    assert_eq!(total, 1);
    assert_eq!(rows[0].id, pending.id);

    let (rows, total) = service.find_all_requests(1, 10, None, Some(RequestStatus::Approved))?;
    assert_eq!(total, 1);
    assert_eq!(rows[0].id, approved.id);

    // a page past the end is empty but the total is still reported
    let (rows, total) = service.find_all_requests(2, 10, None, None)?;
    assert_eq!(total, 2);
    assert!(rows.is_empty());

    Ok(())
}

#[test]
fn concurrent_approvals_have_a_single_winner() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("racing_approvals.db"),
        ..Default::default()
    };
    let service = Arc::new(ApprovalService::open(config)?);

    let workflow = service.create_workflow("sign-off")?;
    service.create_step(&workflow.id, "Counsel", manual(1_000_000))?;
    let request = service.create_request(&workflow.id, 100)?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let id = request.id.clone();
        handles.push(std::thread::spawn(move || service.approve_request(&id)));
    }

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("approval thread panicked"))
        .collect();

    // exactly one caller observes the pending state and wins
    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(winners, 1);
    for outcome in outcomes.iter().filter(|outcome| outcome.is_err()) {
        assert!(matches!(outcome.as_ref().unwrap_err(), Error::InvalidState));
    }

    let stored = service.get_request(&request.id)?;
    assert_eq!(stored.status, RequestStatus::Approved);

    Ok(())
}

#[test]
fn concurrent_submissions_fold_without_losing_amounts() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("racing_submissions.db"),
        ..Default::default()
    };
    let service = Arc::new(ApprovalService::open(config)?);

    let workflow = service.create_workflow("budget")?;
    service.create_step(&workflow.id, "Manager", api(100))?;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let service = Arc::clone(&service);
        let workflow_id = workflow.id.clone();
        handles.push(std::thread::spawn(move || {
            service.create_request(&workflow_id, 60)
        }));
    }
    for handle in handles {
        handle.join().expect("submission thread panicked")?;
    }

    // both submissions land in a single request, nothing lost
    let (rows, total) = service.find_all_requests(1, 10, Some(&workflow.id), None)?;
    assert_eq!(total, 1);
    assert_eq!(rows[0].amount, 120);
    assert_eq!(rows[0].status, RequestStatus::Approved);

    Ok(())
}

#[test]
fn folding_past_u64_max_fails_without_corrupting_the_request() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("overflow.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let workflow = service.create_workflow("unbounded")?;
    service.create_step(&workflow.id, "Manager", api(u64::MAX))?;

    let request = service.create_request(&workflow.id, u64::MAX - 1)?;
    assert_eq!(request.status, RequestStatus::Pending);

    // folding two more would wrap the cumulative amount; the submission is
    // refused instead
    let err = service.create_request(&workflow.id, 2).unwrap_err();
    assert!(matches!(err, Error::AmountOverflow));

    // the pending request is untouched, and the exact remaining headroom
    // still folds and approves
    let stored = service.get_request(&request.id)?;
    assert_eq!(stored.amount, u64::MAX - 1);
    assert_eq!(stored.status, RequestStatus::Pending);

    let topped_up = service.create_request(&workflow.id, 1)?;
    assert_eq!(topped_up.amount, u64::MAX);
    assert_eq!(topped_up.status, RequestStatus::Approved);

    Ok(())
}

#[test]
fn records_survive_a_flush_and_reopen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("reopen.db");

    let request_id = {
        let config = Config {
            db_path: db_path.clone(),
            ..Default::default()
        };
        let service = ApprovalService::open(config)?;

        let workflow = service.create_workflow("durable")?;
        service.create_step(&workflow.id, "Manager", api(100))?;
        let request = service.create_request(&workflow.id, 150)?;

        service.flush()?;
        request.id
    };

    let config = Config {
        db_path,
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    let stored = service.get_request(&request_id)?;
    assert_eq!(stored.status, RequestStatus::Approved);
    assert_eq!(stored.amount, 150);

    Ok(())
}

#[test]
fn workflow_names_are_unique() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = Config {
        db_path: temp_dir.path().join("names.db"),
        ..Default::default()
    };
    let service = ApprovalService::open(config)?;

    service.create_workflow("procurement")?;
    let err = service.create_workflow("procurement").unwrap_err();
    assert!(matches!(err, Error::WorkflowNameExists));

    let err = service.create_workflow("  ").unwrap_err();
    assert!(matches!(err, Error::EmptyWorkflowName));

    let found = service.get_workflow_by_name("procurement")?;
    assert_eq!(found.name, "procurement");

    Ok(())
}
