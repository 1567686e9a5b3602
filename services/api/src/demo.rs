use crate::infra::{
    parse_date, parse_time, InMemoryAgencyDirectory, InMemoryAppointmentRepository,
    InMemoryNotifier, InMemoryPropertyCatalog, DEMO_AGENT, DEMO_AGENT_USER,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Args;
use std::sync::Arc;
use visit_scheduler::config::SchedulingConfig;
use visit_scheduler::error::AppError;
use visit_scheduler::scheduling::calendar::{self, Slot};
use visit_scheduler::scheduling::{
    AgentId, Appointment, BookingRequest, Clock, MinuteOfDay, OperatingWindow, Principal,
    PropertyId, RescheduleRequest, SchedulingError, SchedulingService, TimeInput, UserId,
};

#[derive(Args, Debug)]
pub(crate) struct SlotsArgs {
    /// Operating weekdays, 1 (Monday) through 7 (Sunday), comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub(crate) days: Vec<u8>,
    /// Slot start times as HH:MM or minutes since midnight, comma separated
    #[arg(long, value_delimiter = ',', required = true, value_parser = parse_time)]
    pub(crate) times: Vec<MinuteOfDay>,
    /// First date of the range (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) from: NaiveDate,
    /// Last date of the range, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) to: NaiveDate,
    /// Override the date treated as today (defaults to the current UTC date)
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Override the date treated as today (defaults to the current UTC date)
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

struct PinnedClock(DateTime<Utc>);

impl Clock for PinnedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

type DemoService = SchedulingService<InMemoryAppointmentRepository, InMemoryNotifier>;

pub(crate) fn run_slots(args: SlotsArgs) -> Result<(), AppError> {
    let SlotsArgs {
        days,
        times,
        from,
        to,
        today,
    } = args;

    let window = match OperatingWindow::new(days, times) {
        Ok(window) => window,
        Err(err) => {
            println!("Invalid operating window: {err}");
            return Ok(());
        }
    };
    let today = today.unwrap_or_else(|| Utc::now().date_naive());

    println!("Bookable slots {from} -> {to} (today {today})");
    if !window.is_configured() {
        println!("- window offers no availability");
        return Ok(());
    }

    let slots: Vec<Slot> = calendar::bookable_slots(&window, from, to, today).collect();
    if slots.is_empty() {
        println!("- none in range");
    }
    for Slot { date, time } in slots {
        println!("- {} {} {}", date, date.format("%a"), time);
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let today = args.today.unwrap_or_else(|| Utc::now().date_naive());
    let notifier = Arc::new(InMemoryNotifier::default());
    let service = demo_service(today, notifier.clone())?;
    let agent = AgentId::from(DEMO_AGENT);
    let caller = Principal::Agent {
        user_id: UserId::from(DEMO_AGENT_USER),
        agent_id: agent.clone(),
    };

    println!("Property-visit scheduling demo (today {today})");
    let upcoming = match upcoming_slots(&service, &agent, today) {
        Ok(slots) => slots,
        Err(err) => {
            println!("  Availability unavailable: {err}");
            return Ok(());
        }
    };
    let (Some(first), Some(second)) = (upcoming.first().copied(), upcoming.get(1).copied())
    else {
        println!("  Demo agency has no upcoming availability");
        return Ok(());
    };
    println!(
        "- {} offers {} slots over the next two weeks",
        agent,
        upcoming.len()
    );

    let Some(booked) = report(
        "Visitor booked",
        service.book(&Principal::Visitor, visitor_booking(first)),
    ) else {
        return Ok(());
    };

    match service.book(&Principal::Visitor, visitor_booking(first)) {
        Ok(duplicate) => describe("Unexpected duplicate booking", &duplicate),
        Err(err) => println!("- Second booking of the same slot rejected: {err}"),
    }
    match service.approve(&Principal::Visitor, booked.id()) {
        Ok(_) => println!("- Anonymous approval unexpectedly accepted"),
        Err(err) => println!("- Anonymous approval rejected: {err}"),
    }

    if report("Agent approved", service.approve(&caller, booked.id())).is_none() {
        return Ok(());
    }
    let moved = service.reschedule(
        &caller,
        booked.id(),
        RescheduleRequest {
            date: Some(second.date),
            time: Some(TimeInput::from(second.time)),
        },
    );
    if report("Agent rescheduled", moved).is_none() {
        return Ok(());
    }
    if report("Agent declined", service.decline(&caller, booked.id())).is_none() {
        return Ok(());
    }

    match service.available_slots(&agent, first.date) {
        Ok(free) => println!(
            "- Free on {}: {}",
            free.date,
            free.slots
                .iter()
                .map(|time| time.label())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Err(err) => println!("  Availability unavailable: {err}"),
    }

    println!("Notifications dispatched:");
    for event in notifier.events() {
        println!("  - {} -> {}", event.kind.label(), event.appointment_id);
    }

    Ok(())
}

fn demo_service(today: NaiveDate, notifier: Arc<InMemoryNotifier>) -> Result<DemoService, AppError> {
    let start_of_day = Utc.from_utc_datetime(&today.and_time(NaiveTime::default()));

    let service = SchedulingService::with_clock(
        Arc::new(InMemoryAppointmentRepository::default()),
        notifier,
        Box::new(InMemoryAgencyDirectory::seeded()),
        Box::new(InMemoryPropertyCatalog::default()),
        Arc::new(PinnedClock(start_of_day)),
        SchedulingConfig::default(),
    )?;
    Ok(service)
}

fn upcoming_slots(
    service: &DemoService,
    agent: &AgentId,
    today: NaiveDate,
) -> Result<Vec<Slot>, SchedulingError> {
    let mut slots = Vec::new();
    for date in today.iter_days().take(14) {
        let free = service.available_slots(agent, date)?;
        slots.extend(free.slots.into_iter().map(|time| Slot { date, time }));
    }
    Ok(slots)
}

fn report(label: &str, outcome: Result<Appointment, SchedulingError>) -> Option<Appointment> {
    match outcome {
        Ok(appointment) => {
            describe(label, &appointment);
            Some(appointment)
        }
        Err(err) => {
            println!("  {label} failed: {err}");
            None
        }
    }
}

fn visitor_booking(slot: Slot) -> BookingRequest {
    BookingRequest {
        agent_id: Some(AgentId::from(DEMO_AGENT)),
        property_id: Some(PropertyId::from("prop-harbor-loft")),
        client_name: "Jordan Visitor".to_string(),
        client_phone: "+1 555 0142".to_string(),
        date: Some(slot.date),
        time: Some(TimeInput::from(slot.time)),
        title: Some("Harbor Loft viewing".to_string()),
        ..BookingRequest::default()
    }
}

fn describe(label: &str, appointment: &Appointment) {
    println!(
        "- {}: {} on {} at {} -> {}",
        label,
        appointment.id(),
        appointment.date(),
        appointment.time(),
        appointment.status()
    );
}
