//! Authorisation: bind a chat user to an employee, then to a restaurant.
//!
//! `/start` consults the context cache; a miss falls through to one joined
//! query. Unbound users enter the last-name FSM: one match binds
//! immediately, several present a chooser, none re-prompts in place.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use galley_chat::{consume_input, show_prompt, Markup};
use galley_db::{
    bind_chat_user, list_departments, search_employees_by_last_name, set_employee_department,
};

use crate::menu::{inline_rows, user_error};
use crate::service::FlowDeps;

pub const ST_LAST_NAME: &str = "auth:last_name";

pub async fn start(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    if let Some(ctx) = deps.user_context(user).await? {
        if ctx.department_id.is_none() {
            return prompt_department(deps, user, chat).await;
        }
        deps.transport
            .send_message(chat, &format!("С возвращением, {}!", ctx.name), None)
            .await?;
        return deps.show_main_menu(chat).await;
    }

    deps.fsm.set_state(user, ST_LAST_NAME).await?;
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Введите вашу фамилию:",
        None,
    )
    .await?;
    Ok(())
}

pub async fn on_last_name(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    consume_input(deps.transport.as_ref(), chat, message_id).await;

    let matches = search_employees_by_last_name(&deps.pool, text).await?;
    match matches.len() {
        0 => {
            // Validation errors edit the existing prompt, never post anew.
            show_prompt(
                deps.transport.as_ref(),
                &deps.fsm,
                user,
                chat,
                &user_error("Сотрудник не найден. Введите фамилию ещё раз:"),
                None,
            )
            .await?;
        }
        1 => {
            bind(deps, user, chat, matches[0].id).await?;
        }
        _ => {
            let buttons = matches
                .into_iter()
                .map(|m| (m.name, format!("auth:pick:{}", m.id)))
                .collect();
            show_prompt(
                deps.transport.as_ref(),
                &deps.fsm,
                user,
                chat,
                "Найдено несколько сотрудников, выберите себя:",
                Some(inline_rows(buttons, 1)),
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn on_callback(deps: &Arc<FlowDeps>, user: i64, chat: i64, rest: &str) -> Result<()> {
    if let Some(raw) = rest.strip_prefix("pick:") {
        if let Ok(employee_id) = raw.parse::<Uuid>() {
            bind(deps, user, chat, employee_id).await?;
        }
        return Ok(());
    }

    if let Some(raw) = rest.strip_prefix("dept:") {
        if let Ok(department_id) = raw.parse::<Uuid>() {
            return choose_department(deps, user, chat, department_id).await;
        }
    }
    Ok(())
}

async fn bind(deps: &Arc<FlowDeps>, user: i64, chat: i64, employee_id: Uuid) -> Result<()> {
    bind_chat_user(&deps.pool, employee_id, user).await?;
    // The previous binding (if any) is gone; rebuild the cached context.
    deps.user_ctx.invalidate(&user.to_string()).await?;
    deps.user_context(user).await?;
    prompt_department(deps, user, chat).await
}

async fn prompt_department(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let departments = list_departments(&deps.pool).await?;
    let buttons = departments
        .into_iter()
        .map(|d| (d.name, format!("auth:dept:{}", d.id)))
        .collect();

    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Выберите ваш ресторан:",
        Some(inline_rows(buttons, 1)),
    )
    .await?;
    Ok(())
}

async fn choose_department(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    department_id: Uuid,
) -> Result<()> {
    let Some(ctx) = deps.user_context(user).await? else {
        deps.notify(chat, &user_error("Сначала авторизуйтесь: /start")).await;
        return Ok(());
    };

    set_employee_department(&deps.pool, ctx.employee_id, department_id).await?;
    deps.user_ctx.invalidate(&user.to_string()).await?;
    let ctx = deps.user_context(user).await?;

    deps.fsm.clear(user).await?;
    let name = ctx.map(|c| c.name).unwrap_or_default();
    deps.transport
        .send_message(chat, &format!("Готово, {name}! Ресторан выбран."), Some(Markup::RemoveReply))
        .await?;
    deps.show_main_menu(chat).await
}
