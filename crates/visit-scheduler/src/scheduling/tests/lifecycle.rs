use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;

use super::common::*;
use crate::scheduling::domain::{AppointmentId, AppointmentStatus, EventKind, Transition};
use crate::scheduling::lifecycle::AppointmentStateMachine;
use crate::scheduling::repository::{AppointmentRepository, RepositoryError};
use crate::scheduling::window::OperatingWindow;
use crate::scheduling::SchedulingError;

fn machine() -> (AppointmentStateMachine<MemoryRepository>, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::default());
    let machine =
        AppointmentStateMachine::new(repository.clone(), FixedClock::monday_morning(), config())
            .expect("machine builds");
    (machine, repository)
}

type InterleavedMachine = AppointmentStateMachine<InterleavingRepository>;

fn interleaving_machine() -> (Arc<InterleavedMachine>, Arc<InterleavingRepository>) {
    let repository = Arc::new(InterleavingRepository::default());
    let machine =
        AppointmentStateMachine::new(repository.clone(), FixedClock::monday_morning(), config())
            .expect("machine builds");
    (Arc::new(machine), repository)
}

/// Starts `reschedule(id, date, time)` on another thread from inside the next row write and
/// gives it a chance to finish before that write returns.
fn reschedule_during_next_write(
    machine: &Arc<InterleavedMachine>,
    repository: &InterleavingRepository,
    id: &AppointmentId,
    date: NaiveDate,
    minutes: u16,
) -> mpsc::Receiver<Result<Transition, SchedulingError>> {
    let (outcome_tx, outcome_rx) = mpsc::channel();
    let racer = Arc::clone(machine);
    let id = id.clone();
    repository.after_next_update(move || {
        let (finished_tx, finished_rx) = mpsc::channel();
        thread::spawn(move || {
            let outcome = racer.reschedule(&id, date, time(minutes), &window());
            let _ = finished_tx.send(());
            let _ = outcome_tx.send(outcome);
        });
        let _ = finished_rx.recv_timeout(Duration::from_millis(200));
    });
    outcome_rx
}

#[test]
fn create_persists_a_pending_visit_holding_its_slot() {
    let (machine, repository) = machine();

    let transition = machine
        .create(visit(monday(), 480), &window())
        .expect("slot is open");

    let appointment = transition.appointment;
    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.id.0, "apt-000001");
    assert_eq!(appointment.revision, 1);
    assert_eq!(appointment.start, time(480).on(monday()).expect("valid"));
    assert_eq!(appointment.end - appointment.start, chrono::Duration::minutes(60));
    assert_eq!(transition.event.kind, EventKind::Created);
    assert_eq!(repository.stored(&appointment.id), Some(appointment.clone()));
    assert!(machine.index().is_occupied(&agent(), monday(), time(480)));
}

#[test]
fn tuesday_is_outside_a_mon_wed_fri_window() {
    let (machine, repository) = machine();

    let err = machine
        .create(visit(tuesday(), 480), &window())
        .expect_err("tuesday is closed");

    assert!(matches!(err, SchedulingError::OutsideOperatingWindow { .. }));
    assert!(repository.all().expect("readable").is_empty());
}

#[test]
fn off_grid_time_is_outside_the_window() {
    let (machine, _) = machine();
    let err = machine
        .create(visit(monday(), 540), &window())
        .expect_err("09:00 is not offered");
    assert!(matches!(err, SchedulingError::OutsideOperatingWindow { .. }));
}

#[test]
fn second_booking_of_the_same_slot_conflicts() {
    let (machine, repository) = machine();

    let first = machine
        .create(visit(monday(), 480), &window())
        .expect("first booking");
    let err = machine
        .create(visit(monday(), 480), &window())
        .expect_err("second booking conflicts");

    match err {
        SchedulingError::SlotConflict(conflict) => {
            assert_eq!(conflict.holder, first.appointment.id)
        }
        other => panic!("expected slot conflict, got {other:?}"),
    }
    assert_eq!(repository.all().expect("readable").len(), 1);
}

#[test]
fn blank_client_name_is_a_validation_error() {
    let (machine, _) = machine();
    let mut request = visit(monday(), 480);
    request.client_name = "   ".to_string();

    let err = machine
        .create(request, &window())
        .expect_err("name required");

    assert!(matches!(err, SchedulingError::Validation(_)));
    assert!(machine.index().is_empty());
}

#[test]
fn empty_window_never_accepts_a_booking() {
    let (machine, _) = machine();
    let no_slots = OperatingWindow::new(1..=7, []).expect("valid window");

    for window in [OperatingWindow::closed(), no_slots] {
        let err = machine
            .create(visit(monday(), 480), &window)
            .expect_err("nothing is bookable");
        assert!(matches!(err, SchedulingError::OutsideOperatingWindow { .. }));
    }
}

#[test]
fn approving_twice_is_an_invalid_transition() {
    let (machine, _) = machine();
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;

    let approved = machine.approve(&id).expect("pending approves");
    assert_eq!(approved.appointment.status, AppointmentStatus::Approved);
    assert_eq!(approved.appointment.revision, 2);

    let err = machine.approve(&id).expect_err("already approved");
    assert!(matches!(
        err,
        SchedulingError::InvalidTransition {
            from: AppointmentStatus::Approved,
            action: "approve"
        }
    ));
}

#[test]
fn approving_a_declined_visit_leaves_it_unchanged() {
    let (machine, repository) = machine();
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;
    machine.decline(&id).expect("declines");
    let before = repository.stored(&id).expect("stored");

    let err = machine.approve(&id).expect_err("declined is terminal for approve");

    assert!(matches!(err, SchedulingError::InvalidTransition { .. }));
    assert_eq!(repository.stored(&id), Some(before));
}

#[test]
fn decline_frees_the_slot_for_a_new_booking() {
    let (machine, _) = machine();
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;
    machine.approve(&id).expect("approves");

    let declined = machine.decline(&id).expect("approved visits can be declined");
    assert_eq!(declined.event.kind, EventKind::Declined);
    assert!(!machine.index().is_occupied(&agent(), monday(), time(480)));

    machine
        .create(visit(monday(), 480), &window())
        .expect("freed slot is bookable again");
    assert!(matches!(
        machine.decline(&id),
        Err(SchedulingError::InvalidTransition { .. })
    ));
}

#[test]
fn reschedule_resets_approval_and_frees_the_old_slot() {
    let (machine, _) = machine();
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;
    machine.approve(&id).expect("approves");

    let moved = machine
        .reschedule(&id, wednesday(), time(600), &window())
        .expect("wednesday 10:00 is open");

    assert_eq!(moved.appointment.id, id);
    assert_eq!(moved.appointment.status, AppointmentStatus::Pending);
    assert_eq!(moved.appointment.date, wednesday());
    assert_eq!(moved.appointment.time, time(600));
    assert_eq!(moved.event.kind, EventKind::Rescheduled);
    assert!(machine.index().is_occupied(&agent(), wednesday(), time(600)));

    machine
        .create(visit(monday(), 480), &window())
        .expect("old slot is immediately bookable");
}

#[test]
fn reschedule_onto_a_taken_slot_keeps_the_original() {
    let (machine, repository) = machine();
    let mover = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment;
    let holder = machine
        .create(visit(wednesday(), 600), &window())
        .expect("booked")
        .appointment;

    let err = machine
        .reschedule(&mover.id, wednesday(), time(600), &window())
        .expect_err("slot is held");

    assert!(matches!(err, SchedulingError::SlotConflict(_)));
    assert_eq!(repository.stored(&mover.id), Some(mover.clone()));
    assert_eq!(
        machine
            .index()
            .holder(&crate::scheduling::SlotKey::of(&holder)),
        Some(holder.id)
    );
    assert!(machine.index().is_occupied(&agent(), monday(), time(480)));
}

#[test]
fn reschedule_to_the_same_slot_returns_to_pending() {
    let (machine, _) = machine();
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;
    machine.approve(&id).expect("approves");

    let same = machine
        .reschedule(&id, monday(), time(480), &window())
        .expect("own slot");

    assert_eq!(same.appointment.status, AppointmentStatus::Pending);
    assert!(machine.index().is_occupied(&agent(), monday(), time(480)));
}

#[test]
fn declined_visit_can_be_rescheduled_back_into_play() {
    let (machine, _) = machine();
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;
    machine.decline(&id).expect("declines");

    let revived = machine
        .reschedule(&id, monday(), time(600), &window())
        .expect("reschedule works from any status");

    assert_eq!(revived.appointment.status, AppointmentStatus::Pending);
    assert!(machine.index().is_occupied(&agent(), monday(), time(600)));
    assert!(!machine.index().is_occupied(&agent(), monday(), time(480)));
}

#[test]
fn remove_soft_deletes_and_releases() {
    let (machine, repository) = machine();
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;

    let removed = machine.remove(&id).expect("removes");

    assert!(removed.appointment.deleted_at.is_some());
    assert!(repository.stored(&id).is_some());
    assert!(machine.index().is_empty());
    assert!(matches!(machine.remove(&id), Err(SchedulingError::NotFound(_))));
    assert!(matches!(machine.approve(&id), Err(SchedulingError::NotFound(_))));
}

#[test]
fn failed_insert_releases_the_reservation() {
    let repository = Arc::new(ReadOnlyRepository::default());
    let machine =
        AppointmentStateMachine::new(repository, FixedClock::monday_morning(), config())
            .expect("machine builds");

    let err = machine
        .create(visit(monday(), 480), &window())
        .expect_err("storage refuses");

    assert!(err.is_infrastructure());
    assert!(machine.index().is_empty());
}

#[test]
fn failed_reschedule_write_keeps_the_old_reservation() {
    let repository = Arc::new(ReadOnlyRepository::default());
    let (seed, _) = machine();
    let existing = seed
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment;
    repository
        .inner
        .insert(existing.clone())
        .expect("seeded");
    let machine =
        AppointmentStateMachine::new(repository, FixedClock::monday_morning(), config())
            .expect("machine builds");

    let err = machine
        .reschedule(&existing.id, wednesday(), time(600), &window())
        .expect_err("storage refuses");

    assert!(matches!(
        err,
        SchedulingError::Repository(RepositoryError::Unavailable(_))
    ));
    assert!(machine.index().is_occupied(&agent(), monday(), time(480)));
    assert!(!machine.index().is_occupied(&agent(), wednesday(), time(600)));
}

#[test]
fn stale_writes_are_retried_from_a_fresh_read() {
    let repository = Arc::new(RacingRepository::new(2));
    let machine = AppointmentStateMachine::new(
        repository.clone(),
        FixedClock::monday_morning(),
        config(),
    )
    .expect("machine builds");
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;

    let approved = machine.approve(&id).expect("third attempt lands");

    assert_eq!(approved.appointment.status, AppointmentStatus::Approved);
    assert_eq!(repository.update_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn exhausted_retries_surface_as_infrastructure() {
    let repository = Arc::new(RacingRepository::new(10));
    let machine = AppointmentStateMachine::new(
        repository.clone(),
        FixedClock::monday_morning(),
        config(),
    )
    .expect("machine builds");
    let id = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;

    let err = machine.approve(&id).expect_err("never lands");

    assert!(matches!(
        err,
        SchedulingError::Repository(RepositoryError::Stale { .. })
    ));
    assert!(err.is_infrastructure());
    assert_eq!(repository.update_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn restart_rehydrates_occupancy_and_the_id_sequence() {
    let (machine, repository) = machine();
    let kept = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment;
    let declined = machine
        .create(visit(monday(), 600), &window())
        .expect("booked")
        .appointment;
    machine.decline(&declined.id).expect("declines");

    let restarted =
        AppointmentStateMachine::new(repository, FixedClock::monday_morning(), config())
            .expect("machine rebuilds");

    assert!(restarted.index().is_occupied(&agent(), monday(), time(480)));
    assert!(!restarted.index().is_occupied(&agent(), monday(), time(600)));
    let next = restarted
        .create(visit(monday(), 600), &window())
        .expect("declined slot is free")
        .appointment;
    assert_eq!(next.id.0, "apt-000003");
    assert_ne!(next.id, kept.id);
}

#[test]
fn concurrent_creates_for_one_slot_have_a_single_winner() {
    let (machine, repository) = machine();

    let successes = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let machine = &machine;
                scope.spawn(move || machine.create(visit(monday(), 480), &window()))
            })
            .collect();

        let outcomes: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect();
        for outcome in &outcomes {
            if let Err(err) = outcome {
                assert!(matches!(err, SchedulingError::SlotConflict(_)));
            }
        }
        outcomes.iter().filter(|outcome| outcome.is_ok()).count()
    });

    assert_eq!(successes, 1);
    assert_eq!(repository.all().expect("readable").len(), 1);
}

#[test]
fn concurrent_reschedules_onto_one_slot_have_a_single_winner() {
    let (machine, _) = machine();
    let first = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment
        .id;
    let second = machine
        .create(visit(monday(), 600), &window())
        .expect("booked")
        .appointment
        .id;

    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = [&first, &second]
            .into_iter()
            .map(|id| {
                let machine = &machine;
                scope.spawn(move || machine.reschedule(id, wednesday(), time(480), &window()))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect::<Vec<_>>()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|result| matches!(result, Err(SchedulingError::SlotConflict(_)))));
    assert_eq!(machine.index().len(), 2);
}

#[test]
fn reschedule_racing_a_decline_keeps_the_slot_it_lands_on() {
    let (machine, repository) = interleaving_machine();
    let booked = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment;

    let racing = reschedule_during_next_write(&machine, &repository, &booked.id, monday(), 480);
    machine.decline(&booked.id).expect("declines");
    let moved = racing
        .recv_timeout(Duration::from_secs(5))
        .expect("reschedule finishes")
        .expect("reschedule lands after the decline");

    assert_eq!(moved.appointment.status, AppointmentStatus::Pending);
    assert!(machine.index().is_occupied(&agent(), monday(), time(480)));
    assert!(matches!(
        machine.create(visit(monday(), 480), &window()),
        Err(SchedulingError::SlotConflict(_))
    ));
    let holders = repository
        .all()
        .expect("readable")
        .into_iter()
        .filter(|appointment| appointment.occupies_slot())
        .count();
    assert_eq!(holders, 1);
}

#[test]
fn moving_back_during_a_reschedule_keeps_the_original_slot_held() {
    let (machine, repository) = interleaving_machine();
    let booked = machine
        .create(visit(monday(), 480), &window())
        .expect("booked")
        .appointment;

    let racing = reschedule_during_next_write(&machine, &repository, &booked.id, monday(), 480);
    machine
        .reschedule(&booked.id, wednesday(), time(600), &window())
        .expect("moves to wednesday");
    let back = racing
        .recv_timeout(Duration::from_secs(5))
        .expect("reschedule finishes")
        .expect("moves back to monday");

    assert_eq!(back.appointment.date, monday());
    assert!(machine.index().is_occupied(&agent(), monday(), time(480)));
    assert!(!machine.index().is_occupied(&agent(), wednesday(), time(600)));
    assert!(matches!(
        machine.create(visit(monday(), 480), &window()),
        Err(SchedulingError::SlotConflict(_))
    ));
    machine
        .create(visit(wednesday(), 600), &window())
        .expect("wednesday slot was released");
}

#[test]
fn slot_ending_past_the_last_representable_date_is_outside_the_window() {
    let (machine, repository) = machine();
    let every_day =
        OperatingWindow::new(1..=7, [time(480), time(1380)]).expect("valid window");

    let err = machine
        .create(visit(NaiveDate::MAX, 1380), &every_day)
        .expect_err("slot end overflows");
    assert!(matches!(err, SchedulingError::OutsideOperatingWindow { .. }));
    assert!(repository.all().expect("readable").is_empty());
    assert!(machine.index().is_empty());

    let booked = machine
        .create(visit(monday(), 480), &every_day)
        .expect("booked")
        .appointment;
    let err = machine
        .reschedule(&booked.id, NaiveDate::MAX, time(1380), &every_day)
        .expect_err("slot end overflows");
    assert!(matches!(err, SchedulingError::OutsideOperatingWindow { .. }));
    assert!(machine.index().is_occupied(&agent(), monday(), time(480)));
}
