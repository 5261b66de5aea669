//! Calendar commands and free-slot computation.

use super::{optional, required, CommandResult, Executor, Failure, Handled, HandlerResult, Invocation};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use zapflow_core::{
    clock::{format_wall, parse_date, parse_time},
    config::CalendarConfig,
    records::{CalendarEvent, EventDraft},
    traits::Calendar,
};

const DEFAULT_SUGGESTIONS: usize = 3;
const MAX_SUGGESTIONS: usize = 20;
const DEFAULT_LIST_DAYS: i64 = 7;

/// When the calendar owner takes appointments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityRules {
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    /// ISO weekdays, 1 = Monday.
    pub work_days: Vec<u32>,
    pub slot_minutes: u32,
    pub timezone_offset_hours: i64,
}

impl AvailabilityRules {
    pub fn from_config(cfg: &CalendarConfig) -> Self {
        let hour = |raw: &str, fallback: u32| {
            parse_time(raw).unwrap_or_else(|| {
                warn!("calendar: invalid working hour '{raw}', using {fallback}:00");
                NaiveTime::from_hms_opt(fallback, 0, 0).unwrap_or(NaiveTime::MIN)
            })
        };
        Self {
            work_start: hour(&cfg.work_start, 9),
            work_end: hour(&cfg.work_end, 18),
            work_days: cfg.work_days.clone(),
            slot_minutes: cfg.slot_minutes.max(5),
            timezone_offset_hours: cfg.timezone_offset_hours,
        }
    }

    /// Current wall-clock time in the calendar's timezone.
    pub fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + Duration::hours(self.timezone_offset_hours)
    }

    pub fn is_work_day(&self, date: NaiveDate) -> bool {
        self.work_days
            .contains(&date.weekday().number_from_monday())
    }

    /// Whether `[start, end)` lies on one working day inside working hours.
    pub fn within_hours(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        start.date() == end.date()
            && self.is_work_day(start.date())
            && start.time() >= self.work_start
            && end.time() <= self.work_end
    }
}

fn overlaps(event: &CalendarEvent, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    event.start < end && start < event.end
}

/// Up to `count` slot starts on `date` where `duration` fits inside working
/// hours without touching any busy event, none earlier than `now`.
pub fn free_slots(
    date: NaiveDate,
    rules: &AvailabilityRules,
    busy: &[CalendarEvent],
    duration: Duration,
    now: NaiveDateTime,
    count: usize,
) -> Vec<NaiveDateTime> {
    let mut slots = Vec::new();
    if !rules.is_work_day(date) || duration <= Duration::zero() {
        return slots;
    }
    let step = Duration::minutes(i64::from(rules.slot_minutes));
    let day_end = date.and_time(rules.work_end);
    let mut start = date.and_time(rules.work_start);

    while start + duration <= day_end && slots.len() < count {
        let end = start + duration;
        if start >= now && !busy.iter().any(|e| overlaps(e, start, end)) {
            slots.push(start);
        }
        start += step;
    }
    slots
}

fn display_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn display_time(dt: &NaiveDateTime) -> String {
    dt.format("%H:%M").to_string()
}

fn event_json(e: &CalendarEvent) -> Value {
    json!({
        "id": e.id,
        "title": e.title,
        "description": e.description,
        "start": format_wall(&e.start),
        "end": format_wall(&e.end),
    })
}

fn parse_minutes(raw: Option<&str>, default: u32) -> Result<Duration, Failure> {
    let minutes = match raw {
        None => default,
        Some(raw) => match raw.trim().trim_end_matches("min").trim().parse::<u32>() {
            Ok(m) if m > 0 && m <= 24 * 60 => m,
            _ => return Err(Failure::invalid(format!("invalid duration: {raw}"))),
        },
    };
    Ok(Duration::minutes(i64::from(minutes)))
}

fn parse_day(raw: &str) -> Result<NaiveDate, Failure> {
    parse_date(raw).ok_or_else(|| Failure::invalid(format!("invalid date: {raw}")))
}

fn parse_at(date: &str, time: &str) -> Result<NaiveDateTime, Failure> {
    let day = parse_day(date)?;
    let time = parse_time(time).ok_or_else(|| Failure::invalid(format!("invalid time: {time}")))?;
    Ok(day.and_time(time))
}

impl Executor {
    fn connected_calendar(&self) -> Result<&Arc<dyn Calendar>, Failure> {
        self.calendar
            .as_ref()
            .ok_or_else(|| Failure::not_connected("calendar"))
    }

    fn rules(&self) -> AvailabilityRules {
        AvailabilityRules::from_config(&self.settings.calendar)
    }

    async fn conflicts(
        calendar: &Arc<dyn Calendar>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        ignore_id: Option<&str>,
    ) -> Result<Vec<CalendarEvent>, Failure> {
        Ok(calendar
            .list_events(start, end)
            .await?
            .into_iter()
            .filter(|e| overlaps(e, start, end) && Some(e.id.as_str()) != ignore_id)
            .collect())
    }

    /// `verificarDisponibilidade(date, start, end)`
    pub(crate) async fn calendar_availability(
        &self,
        _inv: &Invocation<'_>,
        args: &[String],
    ) -> HandlerResult {
        let date = required(args, 0, "date")?;
        let start = parse_at(date, required(args, 1, "start")?)?;
        let end = parse_at(date, required(args, 2, "end")?)?;
        if end <= start {
            return Err(Failure::invalid("end must be after start"));
        }
        let calendar = self.connected_calendar()?;
        let rules = self.rules();

        let conflicts = Self::conflicts(calendar, start, end, None).await?;
        let within_hours = rules.within_hours(start, end);
        let available = within_hours && conflicts.is_empty();

        let span = format!(
            "{} das {} às {}",
            display_date(start.date()),
            display_time(&start),
            display_time(&end)
        );
        let note = if available {
            format!("{span}: disponível.")
        } else if !within_hours {
            format!("{span}: fora do horário de atendimento.")
        } else {
            let titles: Vec<&str> = conflicts.iter().map(|e| e.title.as_str()).collect();
            format!("{span}: indisponível ({}).", titles.join(", "))
        };

        let result = CommandResult::ok(if available { "available" } else { "unavailable" })
            .with("available", available)
            .with("within_hours", within_hours)
            .with(
                "conflicts",
                conflicts.iter().map(event_json).collect::<Vec<_>>(),
            );
        Ok(Handled::with_note(result, note))
    }

    /// `sugerirHorarios(date, duration?, count?)`
    pub(crate) async fn calendar_suggest(
        &self,
        _inv: &Invocation<'_>,
        args: &[String],
    ) -> HandlerResult {
        let date = parse_day(required(args, 0, "date")?)?;
        let rules = self.rules();
        let duration = parse_minutes(optional(args, 1), rules.slot_minutes)?;
        let count = match optional(args, 2) {
            None => DEFAULT_SUGGESTIONS,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if (1..=MAX_SUGGESTIONS).contains(&n) => n,
                _ => return Err(Failure::invalid(format!("invalid count: {raw}"))),
            },
        };
        let calendar = self.connected_calendar()?;

        let busy = calendar
            .list_events(date.and_time(rules.work_start), date.and_time(rules.work_end))
            .await?;
        let slots = free_slots(date, &rules, &busy, duration, rules.now(), count);
        let times: Vec<String> = slots.iter().map(display_time).collect();

        let note = if times.is_empty() {
            format!("Não há horários disponíveis em {}.", display_date(date))
        } else {
            format!(
                "Horários disponíveis em {}: {}.",
                display_date(date),
                times.join(", ")
            )
        };
        let result = CommandResult::ok(format!("{} slots", times.len()))
            .with("date", date.to_string())
            .with("duration_minutes", duration.num_minutes())
            .with("slots", times);
        Ok(Handled::with_note(result, note))
    }

    /// `marcarEvento(date, time, title, duration?, description?)`
    pub(crate) async fn calendar_book(&self, inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let date = required(args, 0, "date")?;
        let start = parse_at(date, required(args, 1, "time")?)?;
        let title = required(args, 2, "title")?;
        let rules = self.rules();
        let end = start + parse_minutes(optional(args, 3), rules.slot_minutes)?;
        if start <= rules.now() {
            return Err(Failure::invalid(format!(
                "event time is in the past: {}",
                format_wall(&start)
            )));
        }
        let calendar = self.connected_calendar()?;

        let conflicts = Self::conflicts(calendar, start, end, None).await?;
        if let Some(c) = conflicts.first() {
            return Err(Failure::invalid(format!("time slot conflicts with: {}", c.title)));
        }

        let event = calendar
            .create_event(&EventDraft {
                title: title.to_string(),
                description: optional(args, 4).map(str::to_string),
                start,
                end,
                attendee: inv.conversation_id.to_string(),
            })
            .await?;
        info!("calendar: booked {} for {}", event.id, inv.conversation_id);
        Ok(CommandResult::ok("event booked")
            .with("id", event.id.clone())
            .with("event", event_json(&event))
            .into())
    }

    /// `remarcarEvento(id, date, time, duration?)`
    pub(crate) async fn calendar_reschedule(
        &self,
        _inv: &Invocation<'_>,
        args: &[String],
    ) -> HandlerResult {
        let id = required(args, 0, "id")?;
        let date = required(args, 1, "date")?;
        let start = parse_at(date, required(args, 2, "time")?)?;
        let rules = self.rules();
        let end = start + parse_minutes(optional(args, 3), rules.slot_minutes)?;
        if start <= rules.now() {
            return Err(Failure::invalid(format!(
                "event time is in the past: {}",
                format_wall(&start)
            )));
        }
        let calendar = self.connected_calendar()?;

        let conflicts = Self::conflicts(calendar, start, end, Some(id)).await?;
        if let Some(c) = conflicts.first() {
            return Err(Failure::invalid(format!("time slot conflicts with: {}", c.title)));
        }

        let event = calendar.move_event(id, start, end).await?;
        Ok(CommandResult::ok("event moved")
            .with("id", event.id.clone())
            .with("event", event_json(&event))
            .into())
    }

    /// `cancelarEvento(id)`
    pub(crate) async fn calendar_cancel(&self, _inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let id = required(args, 0, "id")?;
        let calendar = self.connected_calendar()?;
        calendar.cancel_event(id).await?;
        Ok(CommandResult::ok("event cancelled").with("id", id).into())
    }

    /// `listarEventos(date?, end_date?)`: one day when only `date` is given,
    /// the next week when neither is.
    pub(crate) async fn calendar_list(&self, _inv: &Invocation<'_>, args: &[String]) -> HandlerResult {
        let rules = self.rules();
        let (from, to) = match (optional(args, 0), optional(args, 1)) {
            (Some(d), Some(e)) => (parse_day(d)?, parse_day(e)?),
            (Some(d), None) => {
                let day = parse_day(d)?;
                (day, day)
            }
            (None, _) => {
                let today = rules.now().date();
                (today, today + Duration::days(DEFAULT_LIST_DAYS - 1))
            }
        };
        if to < from {
            return Err(Failure::invalid("end date is before start date"));
        }
        let calendar = self.connected_calendar()?;

        let mut events = calendar
            .list_events(
                from.and_time(NaiveTime::MIN),
                (to + Duration::days(1)).and_time(NaiveTime::MIN),
            )
            .await?;
        events.sort_by_key(|e| e.start);
        Ok(CommandResult::ok(format!("{} events", events.len()))
            .with("from", from.to_string())
            .with("to", to.to_string())
            .with("events", events.iter().map(event_json).collect::<Vec<_>>())
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AvailabilityRules {
        AvailabilityRules::from_config(&CalendarConfig::default())
    }

    fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_hms_opt(h, m, 0).unwrap()
    }

    fn event(id: &str, start: NaiveDateTime, end: NaiveDateTime) -> CalendarEvent {
        CalendarEvent {
            id: id.into(),
            title: format!("evento {id}"),
            description: None,
            start,
            end,
        }
    }

    // 2030-01-07 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    #[test]
    fn test_rules_from_default_config() {
        let r = rules();
        assert_eq!(r.work_start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(r.work_end, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
        assert!(r.is_work_day(monday()));
        assert!(!r.is_work_day(monday() + Duration::days(5)));
    }

    #[test]
    fn test_invalid_hours_fall_back() {
        let cfg = CalendarConfig {
            work_start: "cedo".into(),
            ..Default::default()
        };
        let r = AvailabilityRules::from_config(&cfg);
        assert_eq!(r.work_start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_free_slots_skips_busy() {
        let day = monday();
        let busy = vec![event("a", at(day, 9, 30), at(day, 10, 30))];
        let slots = free_slots(
            day,
            &rules(),
            &busy,
            Duration::minutes(30),
            at(day, 0, 0),
            4,
        );
        let times: Vec<String> = slots.iter().map(display_time).collect();
        assert_eq!(times, vec!["09:00", "10:30", "11:00", "11:30"]);
    }

    #[test]
    fn test_free_slots_respects_now_and_end_of_day() {
        let day = monday();
        let slots = free_slots(
            day,
            &rules(),
            &[],
            Duration::minutes(60),
            at(day, 16, 10),
            10,
        );
        let times: Vec<String> = slots.iter().map(display_time).collect();
        assert_eq!(times, vec!["16:30", "17:00"]);
    }

    #[test]
    fn test_free_slots_weekend_is_empty() {
        let saturday = monday() + Duration::days(5);
        let slots = free_slots(
            saturday,
            &rules(),
            &[],
            Duration::minutes(30),
            at(monday(), 0, 0),
            3,
        );
        assert!(slots.is_empty());
    }

    #[test]
    fn test_within_hours() {
        let r = rules();
        let day = monday();
        assert!(r.within_hours(at(day, 9, 0), at(day, 18, 0)));
        assert!(!r.within_hours(at(day, 8, 30), at(day, 9, 30)));
        assert!(!r.within_hours(at(day, 17, 30), at(day, 18, 30)));
    }

    #[test]
    fn test_parse_minutes() {
        assert_eq!(parse_minutes(None, 30).ok(), Some(Duration::minutes(30)));
        assert_eq!(
            parse_minutes(Some("45min"), 30).ok(),
            Some(Duration::minutes(45))
        );
        assert!(parse_minutes(Some("0"), 30).is_err());
        assert!(parse_minutes(Some("muito"), 30).is_err());
    }
}
