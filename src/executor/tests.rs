use super::*;
use crate::gateway::RecentOutgoing;
use crate::markers::extract;
use crate::testing::{FakeCalendar, FakeFetcher, FakeMailer, FakeTransport};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use std::time::Duration;
use zapflow_core::{
    config::Config,
    message::OutboundPayload,
    records::{CalendarEvent, JobScope},
    traits::{SchedulerStore, StateStore},
};
use zapflow_memory::Store;

const CONV: &str = "5511999990000";

struct Harness {
    store: Store,
    transport: Arc<FakeTransport>,
    outgoing: Arc<RecentOutgoing>,
    executor: Executor,
}

async fn harness() -> Harness {
    let store = Store::open_in_memory("test").await.unwrap();
    let transport = FakeTransport::new();
    let outgoing = Arc::new(RecentOutgoing::new(16, Duration::from_secs(60)));
    let executor = Executor::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        transport.clone(),
        outgoing.clone(),
        ExecutorSettings::from_config(&Config::default()),
    );
    Harness {
        store,
        transport,
        outgoing,
        executor,
    }
}

async fn run(h: &Harness, text: &str) -> ExecutionReport {
    run_with(h, text, &SessionConfig::default()).await
}

async fn run_with(h: &Harness, text: &str, session: &SessionConfig) -> ExecutionReport {
    h.executor
        .execute(CONV, extract(text).commands, session)
        .await
}

fn result(report: &ExecutionReport, idx: usize) -> &CommandResult {
    report.commands[idx].result.as_ref().unwrap()
}

fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_hms_opt(h, m, 0).unwrap()
}

// 2030-01-07 is a Monday.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

fn meeting() -> CalendarEvent {
    CalendarEvent {
        id: "ev1".into(),
        title: "Reunião".into(),
        description: None,
        start: at(monday(), 9, 0),
        end: at(monday(), 10, 0),
    }
}

// --- execution contract ---

#[tokio::test]
async fn test_every_command_gets_one_result() {
    let h = harness().await;
    let report = run(&h, "ok setContexto(a, 1) e getContexto(a) fim").await;
    assert_eq!(report.commands.len(), 2);
    assert!(report.commands.iter().all(|c| c.result.is_some()));
    assert_eq!(result(&report, 1).data["value"], json!("1"));
}

#[tokio::test]
async fn test_failure_does_not_stop_later_commands() {
    let h = harness().await;
    let report = run(&h, "agendar2(nunca, \"oi\") setContexto(nome, Ana)").await;
    assert!(!result(&report, 0).ok);
    assert_eq!(result(&report, 0).code, code::ERR_INVALID_ARG);
    assert!(result(&report, 1).ok);
    assert_eq!(
        h.store.get_context(CONV, "nome").await.unwrap().as_deref(),
        Some("Ana")
    );
}

#[tokio::test]
async fn test_missing_argument_code() {
    let h = harness().await;
    let report = run(&h, "setContexto(nome) agendar2()").await;
    assert_eq!(result(&report, 0).code, code::ERR_MISSING_ARG);
    assert_eq!(result(&report, 1).code, code::ERR_MISSING_ARG);
}

#[tokio::test]
async fn test_plain_commands_produce_no_notes() {
    let h = harness().await;
    let report = run(&h, "setContexto(a, b) addTag(vip) registrarEvento(lead)").await;
    assert!(report.notes.is_empty());
    assert!(!report.self_trigger);
}

// --- schedules ---

#[tokio::test]
async fn test_schedule_in_enqueues_individual_job() {
    let h = harness().await;
    let report = run(&h, "agendar2(2h, \"Oi, tudo bem?\", promo)").await;
    let res = result(&report, 0);
    assert!(res.ok, "{res:?}");
    assert_eq!(res.data["tag"], json!("promo"));
    assert_eq!(res.data["category"], json!("followup"));

    let id = res.data["id"].as_str().unwrap();
    let job = h.store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.scope, JobScope::Individual);
    assert_eq!(job.target, CONV);
    assert_eq!(job.message, "Oi, tudo bem?");
}

#[tokio::test]
async fn test_group_session_schedules_group_job() {
    let h = harness().await;
    let session = SessionConfig {
        is_group: true,
        ..Default::default()
    };
    let report = run_with(&h, "agendar2(1d, lembrete)", &session).await;
    let id = result(&report, 0).data["id"].as_str().unwrap().to_string();
    let job = h.store.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.scope, JobScope::Group);
}

#[tokio::test]
async fn test_schedule_at_rejects_past_and_bad_dates() {
    let h = harness().await;
    let report = run(
        &h,
        "agendar(2000-01-01, 10:00, oi) agendar(31/02/2030, 10:00, oi) agendar(2099-01-01, 10h30, oi)",
    )
    .await;
    assert_eq!(result(&report, 0).code, code::ERR_INVALID_ARG);
    assert_eq!(result(&report, 1).code, code::ERR_INVALID_ARG);
    assert!(result(&report, 2).ok);
    assert_eq!(
        result(&report, 2).data["scheduled_at"],
        json!("2099-01-01 10:30:00")
    );
}

#[tokio::test]
async fn test_reset_cadence_replaces_pending() {
    let h = harness().await;
    run(&h, "agendar2(1h, primeiro) agendar2(2h, segundo)").await;
    let report = run(&h, "reagendar(1d, \"novo ciclo\", cadencia)").await;
    let res = result(&report, 0);
    assert!(res.ok);
    assert_eq!(res.data["cancelled"], json!(2));

    let pending = h.store.pending_jobs_for(CONV, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "novo ciclo");
    assert_eq!(pending[0].tag, "cadencia");
}

#[tokio::test]
async fn test_reset_cadence_in_group_session() {
    let h = harness().await;
    let session = SessionConfig {
        is_group: true,
        ..Default::default()
    };
    run_with(&h, "agendar2(1h, primeiro) agendar2(2h, segundo)", &session).await;
    let report = run_with(&h, "reagendar(1d, novo)", &session).await;
    assert_eq!(result(&report, 0).data["cancelled"], json!(2));

    let pending = h.store.pending_jobs_for(CONV, None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "novo");
    assert_eq!(pending[0].scope, JobScope::Group);
}

#[tokio::test]
async fn test_cancel_schedules_in_group_session() {
    let h = harness().await;
    let session = SessionConfig {
        is_group: true,
        ..Default::default()
    };
    let report = run_with(
        &h,
        "agendar2(1h, a) agendar2(2h, b) cancelarAgendamentos()",
        &session,
    )
    .await;
    assert_eq!(result(&report, 2).data["cancelled"], json!(2));
    assert!(h.store.pending_jobs_for(CONV, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_and_delete_schedules() {
    let h = harness().await;
    run(
        &h,
        "agendar2(1h, a, promo) agendar2(2h, b, promo) agendar2(3h, c, outro, vendas)",
    )
    .await;

    let report = run(&h, "listarAgendamentos(promo) listarAgendamentos()").await;
    assert_eq!(result(&report, 0).data["jobs"].as_array().unwrap().len(), 2);
    assert_eq!(result(&report, 1).data["jobs"].as_array().unwrap().len(), 3);

    let report = run(
        &h,
        "apagarAgendamentosTag(promo) apagarAgendamentosCategoria(vendas) apagarAgendamento(nada)",
    )
    .await;
    assert_eq!(result(&report, 0).data["deleted"], json!(2));
    assert_eq!(result(&report, 1).data["deleted"], json!(1));
    assert_eq!(result(&report, 2).code, code::ERR_NOT_FOUND);
}

#[tokio::test]
async fn test_delete_schedule_by_id() {
    let h = harness().await;
    let report = run(&h, "agendar2(1h, a)").await;
    let id = result(&report, 0).data["id"].as_str().unwrap().to_string();
    let report = run(&h, &format!("apagarAgendamento({id})")).await;
    assert!(result(&report, 0).ok);
    assert!(h.store.get_job(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_schedules_with_cause() {
    let h = harness().await;
    let report = run(&h, "agendar2(1h, a) cancelarAgendamentos(\"cliente fechou\")").await;
    assert_eq!(result(&report, 1).data["cancelled"], json!(1));
    let id = result(&report, 0).data["id"].as_str().unwrap().to_string();
    let job = h.store.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.error.as_deref(), Some("cliente fechou"));
}

// --- opt-out ---

#[tokio::test]
async fn test_opt_out_cancels_and_blocks_scheduling() {
    let h = harness().await;
    run(&h, "agendar2(1h, a) agendar2(2h, b)").await;
    let report = run(&h, "optout(\"pediu para sair\") agendar2(1h, c) reagendar(1d, d)").await;
    assert_eq!(result(&report, 0).data["cancelled"], json!(2));
    assert_eq!(result(&report, 1).code, code::ERR_OPTED_OUT);
    assert_eq!(result(&report, 2).code, code::ERR_OPTED_OUT);

    assert!(h.store.pending_jobs_for(CONV, None).await.unwrap().is_empty());
    let contact = h.store.get_contact(CONV).await.unwrap().unwrap();
    assert!(contact.opted_out);
    let events = h.store.events_for(CONV).await.unwrap();
    assert_eq!(
        events,
        vec![("optout".to_string(), Some("pediu para sair".to_string()))]
    );
}

// --- state ---

#[tokio::test]
async fn test_context_commands() {
    let h = harness().await;
    let report = run(
        &h,
        "setContexto(a, 1) setContexto(b, 2) listarContexto() limparContexto(a) getContexto(a) limparContexto()",
    )
    .await;
    assert_eq!(
        result(&report, 2).data["values"],
        json!({"a": "1", "b": "2"})
    );
    assert_eq!(result(&report, 3).data["removed"], json!(1));
    assert_eq!(result(&report, 4).data["value"], json!(null));
    assert!(result(&report, 4).ok);
    assert_eq!(result(&report, 5).data["removed"], json!(1));
}

#[tokio::test]
async fn test_variables_are_instance_wide() {
    let h = harness().await;
    run(&h, "setVariavel(promo_ativa, sim)").await;
    let report = h
        .executor
        .execute(
            "outra-conversa",
            extract("getVariavel(promo_ativa)").commands,
            &SessionConfig::default(),
        )
        .await;
    assert_eq!(result(&report, 0).data["value"], json!("sim"));
}

#[tokio::test]
async fn test_contact_name_and_tags() {
    let h = harness().await;
    let report = run(
        &h,
        "setNome(\"Ana Souza\") addTag(VIP) addTag(vip) addTag(lead) removerTag(Vip) removerTag(nada)",
    )
    .await;
    assert_eq!(result(&report, 1).data["added"], json!(true));
    assert_eq!(result(&report, 2).data["added"], json!(false));
    assert_eq!(result(&report, 4).data["removed"], json!(true));
    assert_eq!(result(&report, 5).data["removed"], json!(false));

    let contact = h.store.get_contact(CONV).await.unwrap().unwrap();
    assert_eq!(contact.display_name.as_deref(), Some("Ana Souza"));
    assert_eq!(contact.tags, vec!["lead".to_string()]);
}

// --- messaging ---

#[tokio::test]
async fn test_send_message_delivers_and_remembers() {
    let h = harness().await;
    let report = run(&h, "whatsapp(\"+55 11 98888-7777\", \"Novo lead chegou\")").await;
    assert!(result(&report, 0).ok);
    assert_eq!(
        h.transport.sent(),
        vec![(
            "5511988887777".to_string(),
            OutboundPayload::text("Novo lead chegou")
        )]
    );
    assert!(h.outgoing.is_recent("5511988887777", "Novo lead chegou"));
}

#[tokio::test]
async fn test_send_message_rejections() {
    let h = harness().await;
    let report = run(&h, "whatsapp(123, oi)").await;
    assert_eq!(result(&report, 0).code, code::ERR_INVALID_ARG);

    h.transport.set_connected(false);
    let report = run(&h, "whatsapp(5511988887777, oi)").await;
    assert_eq!(result(&report, 0).code, code::ERR_NOT_CONNECTED);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_mail_requires_mailer() {
    let h = harness().await;
    let report = run(&h, "enviarEmail(ana@exemplo.com, Assunto, Corpo)").await;
    assert_eq!(result(&report, 0).code, code::ERR_NOT_CONNECTED);
}

#[tokio::test]
async fn test_mail_sent_through_mailer() {
    let mut h = harness().await;
    let mailer = Arc::new(FakeMailer::default());
    h.executor = h.executor.with_mailer(mailer.clone());

    let report = run(
        &h,
        "enviarEmail(ana@exemplo.com, \"Proposta\", \"<b>Olá</b>\", html) enviarEmail(sem-arroba, a, b)",
    )
    .await;
    assert!(result(&report, 0).ok);
    assert_eq!(result(&report, 1).code, code::ERR_INVALID_ARG);

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].html);
    assert_eq!(sent[0].subject, "Proposta");
    assert_eq!(sent[0].from, Config::default().mail.from);
}

#[tokio::test]
async fn test_fetch_url() {
    let mut h = harness().await;
    let report = run(&h, "lerUrl(https://exemplo.com)").await;
    assert_eq!(result(&report, 0).code, code::ERR_NOT_CONNECTED);

    h.executor = h.executor.with_fetcher(Arc::new(FakeFetcher {
        body: "x".repeat(10_000),
    }));
    let report = run(&h, "lerUrl(https://exemplo.com) lerUrl(file:///etc/passwd)").await;
    let content = result(&report, 0).data["content"].as_str().unwrap();
    assert_eq!(content.len(), Config::default().response.fetch_max_chars);
    assert_eq!(result(&report, 1).code, code::ERR_INVALID_ARG);
}

// --- boomerang ---

#[tokio::test]
async fn test_boomerang_requests_nested_run() {
    let h = harness().await;
    let report = run(&h, "boomerang()").await;
    assert!(report.self_trigger);
    assert_eq!(report.notes, vec![Config::default().response.boomerang_note]);
    assert_eq!(result(&report, 0).data["triggered"], json!(true));
}

#[tokio::test]
async fn test_boomerang_inside_nested_run_is_inert() {
    let h = harness().await;
    let nested = SessionConfig::default().nested();
    let report = run_with(&h, "boomerang()", &nested).await;
    assert!(!report.self_trigger);
    assert!(result(&report, 0).ok);
    assert_eq!(result(&report, 0).data["triggered"], json!(false));
}

// --- calendar ---

#[tokio::test]
async fn test_calendar_commands_without_calendar() {
    let h = harness().await;
    let report = run(
        &h,
        "sugerirHorarios(2030-01-07) marcarEvento(2030-01-07, 14:00, Visita) listarEventos()",
    )
    .await;
    for idx in 0..3 {
        assert_eq!(result(&report, idx).code, code::ERR_NOT_CONNECTED);
    }
    assert!(report.notes.is_empty());
}

#[tokio::test]
async fn test_calendar_suggest_adds_note() {
    let mut h = harness().await;
    h.executor = h
        .executor
        .with_calendar(FakeCalendar::with_events(vec![meeting()]));
    let report = run(&h, "sugerirHorarios(07/01/2030)").await;
    let res = result(&report, 0);
    assert!(res.ok);
    assert_eq!(res.data["slots"], json!(["10:00", "10:30", "11:00"]));
    assert_eq!(
        report.notes,
        vec!["Horários disponíveis em 07/01/2030: 10:00, 10:30, 11:00.".to_string()]
    );
}

#[tokio::test]
async fn test_calendar_availability() {
    let mut h = harness().await;
    h.executor = h
        .executor
        .with_calendar(FakeCalendar::with_events(vec![meeting()]));
    let report = run(
        &h,
        "verificarDisponibilidade(2030-01-07, 09:30, 10:30) verificarDisponibilidade(2030-01-07, 14:00, 15:00)",
    )
    .await;
    assert_eq!(result(&report, 0).data["available"], json!(false));
    assert_eq!(
        result(&report, 0).data["conflicts"].as_array().unwrap().len(),
        1
    );
    assert_eq!(result(&report, 1).data["available"], json!(true));
    assert_eq!(report.notes.len(), 2);
    assert!(report.notes[1].ends_with("disponível."));
}

#[tokio::test]
async fn test_calendar_book_checks_conflicts() {
    let mut h = harness().await;
    let calendar = FakeCalendar::with_events(vec![meeting()]);
    h.executor = h.executor.with_calendar(calendar.clone());

    let report = run(
        &h,
        "marcarEvento(2030-01-07, 09:30, Visita) marcarEvento(2030-01-07, 14:00, Visita, 60, \"Trazer contrato\")",
    )
    .await;
    assert_eq!(result(&report, 0).code, code::ERR_INVALID_ARG);
    let res = result(&report, 1);
    assert!(res.ok, "{res:?}");
    assert_eq!(res.data["event"]["end"], json!("2030-01-07 15:00:00"));

    assert_eq!(calendar.events.lock().unwrap().len(), 2);
    assert_eq!(*calendar.attendees.lock().unwrap(), vec![CONV.to_string()]);
}

#[tokio::test]
async fn test_calendar_reschedule_ignores_own_slot() {
    let mut h = harness().await;
    let calendar = FakeCalendar::with_events(vec![meeting()]);
    h.executor = h.executor.with_calendar(calendar.clone());

    let report = run(&h, "remarcarEvento(ev1, 2030-01-07, 09:30, 60)").await;
    assert!(result(&report, 0).ok, "{:?}", result(&report, 0));
    let events = calendar.events.lock().unwrap();
    assert_eq!(events[0].start, at(monday(), 9, 30));
}

#[tokio::test]
async fn test_calendar_cancel_and_list() {
    let mut h = harness().await;
    let calendar = FakeCalendar::with_events(vec![meeting()]);
    h.executor = h.executor.with_calendar(calendar.clone());

    let report = run(
        &h,
        "listarEventos(2030-01-07) cancelarEvento(ev1) listarEventos(2030-01-07, 2030-01-08)",
    )
    .await;
    assert_eq!(result(&report, 0).data["events"].as_array().unwrap().len(), 1);
    assert!(result(&report, 1).ok);
    assert_eq!(result(&report, 2).data["events"], json!([]));
}

#[tokio::test]
async fn test_calendar_backend_error_is_execution_failure() {
    let mut h = harness().await;
    h.executor = h.executor.with_calendar(FakeCalendar::broken());
    let report = run(&h, "cancelarEvento(ev1) setContexto(a, b)").await;
    assert_eq!(result(&report, 0).code, code::ERR_EXECUTION);
    assert!(result(&report, 1).ok);
}

#[tokio::test]
async fn test_collaborator_error_in_the_middle_is_isolated() {
    let mut h = harness().await;
    h.executor = h.executor.with_calendar(FakeCalendar::broken());
    let report = run(&h, "setContexto(a, 1) cancelarEvento(ev1) setContexto(b, 2)").await;
    assert_eq!(report.commands.len(), 3);
    assert!(result(&report, 0).ok);
    assert_eq!(result(&report, 1).code, code::ERR_EXECUTION);
    assert!(result(&report, 2).ok);
    assert_eq!(
        h.store.get_context(CONV, "b").await.unwrap().as_deref(),
        Some("2")
    );
}
