//! JSON-lines protocol.
//!
//! One request object per line, tagged by `"op"`. Every request gets exactly
//! one response line: `{"ok":true,"data":...}` or
//! `{"ok":false,"error":{"code":...,"message":...}}`.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{AccountProvider, Engine, EngineError, ScheduleQuery};
use crate::limits::{DEFAULT_PAGE_SIZE, MAX_LINE_LEN};
use crate::model::{Account, HourSlot, Ms, Role, SlotPage};
use crate::observability::{self, COMMAND_DURATION_SECONDS, COMMANDS_TOTAL};
use crate::request::{AdminStatusChangeRequest, CustomerCancelRequest, ScheduleRequest, SlotQueryRequest};
use crate::schedule::ScheduleStatus;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Ping,
    CreateAccount {
        nickname: String,
        #[serde(default)]
        role: Option<Role>,
    },
    GetAccount {
        account_id: Ulid,
    },
    CreateSchedule {
        account_id: Ulid,
        schedule: ScheduleRequest,
    },
    UpdateSchedule {
        account_id: Ulid,
        schedule_id: u64,
        schedule: ScheduleRequest,
    },
    CancelSchedule {
        account_id: Ulid,
        schedule_id: u64,
        status: ScheduleStatus,
    },
    ListSchedules {
        account_id: Ulid,
        #[serde(default)]
        page_number: usize,
        #[serde(default = "default_page_size")]
        page_size: usize,
    },
    AdminListSchedules {
        account_id: Ulid,
        #[serde(default)]
        owner_id: Option<Ulid>,
        #[serde(default)]
        page_number: usize,
        #[serde(default = "default_page_size")]
        page_size: usize,
    },
    AdminUpdateSchedule {
        account_id: Ulid,
        schedule_id: u64,
        schedule: ScheduleRequest,
    },
    AdminChangeStatus {
        account_id: Ulid,
        schedule_id: u64,
        status: ScheduleStatus,
    },
    GetSlot {
        at: Ms,
    },
    ListSlots {
        start_at: Ms,
        end_at: Ms,
    },
}

#[derive(Debug, Serialize)]
struct SlotView {
    start_at: Ms,
    end_at: Ms,
    max_applicants: i64,
    confirmed_applicants: i64,
}

impl From<HourSlot> for SlotView {
    fn from(slot: HourSlot) -> Self {
        Self {
            start_at: slot.slot_start,
            end_at: slot.end_at(),
            max_applicants: slot.max_applicants,
            confirmed_applicants: slot.confirmed_applicants,
        }
    }
}

#[derive(Debug, Serialize)]
struct SlotPageView {
    start_at: Option<Ms>,
    end_at: Option<Ms>,
    items: Vec<SlotView>,
}

impl From<SlotPage> for SlotPageView {
    fn from(page: SlotPage) -> Self {
        Self {
            start_at: page.start_at(),
            end_at: page.end_at(),
            items: page.items.into_iter().map(SlotView::from).collect(),
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = lines.next().await {
        let reply = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(max = MAX_LINE_LEN, "request line too long");
                error_reply(&EngineError::InvalidArgument(format!(
                    "request line exceeds {MAX_LINE_LEN} bytes"
                )))
            }
            Err(e) => return Err(e),
        };
        lines.send(reply.to_string()).await?;
    }
    Ok(())
}

/// Decode, execute and encode one request line.
pub async fn handle_line(engine: &Engine, line: &str) -> Value {
    let cmd: Command = match serde_json::from_str(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!("malformed request: {e}");
            metrics::counter!(COMMANDS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
            return error_reply(&EngineError::InvalidArgument(format!("malformed request: {e}")));
        }
    };

    let op = observability::command_label(&cmd);
    let start = Instant::now();
    let result = execute(engine, cmd, crate::engine::now_ms()).await;
    metrics::histogram!(COMMAND_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(COMMANDS_TOTAL, "op" => op, "status" => "ok").increment(1);
            json!({ "ok": true, "data": data })
        }
        Err(e) => {
            metrics::counter!(COMMANDS_TOTAL, "op" => op, "status" => "error").increment(1);
            if matches!(e, EngineError::Internal(_)) {
                warn!(op, "command failed: {e}");
            } else {
                debug!(op, code = e.code(), "command rejected: {e}");
            }
            error_reply(&e)
        }
    }
}

fn error_reply(e: &EngineError) -> Value {
    json!({ "ok": false, "error": e.body() })
}

fn to_data(value: impl Serialize) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Internal(format!("encode response: {e}")))
}

async fn require_admin(engine: &Engine, account_id: Ulid) -> Result<Account, EngineError> {
    let account = engine.accounts.get_or_raise(account_id).await?;
    if !account.is_admin() {
        return Err(EngineError::AccessDenied(format!(
            "admin role required. account_id: '{account_id}'"
        )));
    }
    Ok(account)
}

async fn execute(engine: &Engine, cmd: Command, now: Ms) -> Result<Value, EngineError> {
    let orchestrator = &engine.orchestrator;
    match cmd {
        Command::Ping => Ok(json!({ "status": "ok" })),
        Command::CreateAccount { nickname, role } => {
            to_data(engine.accounts.create(nickname, role.unwrap_or(Role::Customer)).await?)
        }
        Command::GetAccount { account_id } => to_data(engine.accounts.get_or_raise(account_id).await?),
        Command::CreateSchedule { account_id, schedule } => {
            let form = schedule.into_form(now)?;
            to_data(orchestrator.create(account_id, form).await?)
        }
        Command::UpdateSchedule {
            account_id,
            schedule_id,
            schedule,
        } => {
            let form = schedule.into_form(now)?;
            to_data(orchestrator.customer_update(schedule_id, form, account_id).await?)
        }
        Command::CancelSchedule {
            account_id,
            schedule_id,
            status,
        } => {
            CustomerCancelRequest { status }.validate()?;
            to_data(orchestrator.customer_cancel(account_id, schedule_id).await?)
        }
        Command::ListSchedules {
            account_id,
            page_number,
            page_size,
        } => {
            engine.accounts.get_or_raise(account_id).await?;
            let query = ScheduleQuery::new(page_number, page_size, Some(account_id))?;
            to_data(orchestrator.list(&query))
        }
        Command::AdminListSchedules {
            account_id,
            owner_id,
            page_number,
            page_size,
        } => {
            require_admin(engine, account_id).await?;
            let query = ScheduleQuery::new(page_number, page_size, owner_id)?;
            to_data(orchestrator.list(&query))
        }
        Command::AdminUpdateSchedule {
            account_id,
            schedule_id,
            schedule,
        } => {
            require_admin(engine, account_id).await?;
            let form = schedule.into_form(now)?;
            to_data(orchestrator.admin_update(schedule_id, form).await?)
        }
        Command::AdminChangeStatus {
            account_id,
            schedule_id,
            status,
        } => {
            require_admin(engine, account_id).await?;
            let status = AdminStatusChangeRequest { status }.into_status()?;
            to_data(orchestrator.admin_change_status(schedule_id, status).await?)
        }
        Command::GetSlot { at } => to_data(SlotView::from(engine.ledger.get(at).await?)),
        Command::ListSlots { start_at, end_at } => {
            let range = SlotQueryRequest { start_at, end_at }.into_range(now)?;
            to_data(SlotPageView::from(engine.ledger.page(&range).await?))
        }
    }
}
