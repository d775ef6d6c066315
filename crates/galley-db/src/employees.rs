//! Employee lookups and the chat-platform binding.
//!
//! The employee mirror is reference data like any other, except for two
//! columns the bot owns: `chat_user_id` and `department_id`. Sync never
//! overwrites them (they are excluded from the upsert's update set).

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Everything the conversation layer needs to know about a bound user,
/// fetched with one joined query and cached per session.
#[derive(Debug, Clone)]
pub struct EmployeeContext {
    pub employee_id: Uuid,
    pub employee_name: String,
    pub chat_user_id: i64,
    pub role_code: Option<String>,
    pub role_name: Option<String>,
    pub department_id: Option<Uuid>,
    pub department_name: Option<String>,
}

/// Single joined fetch: employee + role + chosen department.
pub async fn employee_context(pool: &PgPool, chat_user_id: i64) -> Result<Option<EmployeeContext>> {
    let row = sqlx::query(
        r#"
        select e.id as employee_id,
               e.name as employee_name,
               e.chat_user_id,
               e.role_code,
               r.name as role_name,
               e.department_id,
               d.name as department_name
        from employee e
        left join employee_role r on r.id = e.role_id
        left join department d on d.id = e.department_id
        where e.chat_user_id = $1
          and e.deleted = false
        "#,
    )
    .bind(chat_user_id)
    .fetch_optional(pool)
    .await
    .context("employee_context failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(EmployeeContext {
        employee_id: row.try_get("employee_id")?,
        employee_name: row.try_get("employee_name")?,
        chat_user_id: row.try_get("chat_user_id")?,
        role_code: row.try_get("role_code")?,
        role_name: row.try_get("role_name")?,
        department_id: row.try_get("department_id")?,
        department_name: row.try_get("department_name")?,
    }))
}

#[derive(Debug, Clone)]
pub struct EmployeeMatch {
    pub id: Uuid,
    pub name: String,
}

/// Case-insensitive last-name match, soft-deleted rows excluded.
pub async fn search_employees_by_last_name(
    pool: &PgPool,
    last_name: &str,
) -> Result<Vec<EmployeeMatch>> {
    let rows = sqlx::query(
        r#"
        select id, name
        from employee
        where deleted = false
          and lower(name) like lower($1)
        order by name
        "#,
    )
    .bind(format!("{}%", last_name.trim()))
    .fetch_all(pool)
    .await
    .context("search_employees_by_last_name failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(EmployeeMatch {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        });
    }
    Ok(out)
}

/// Bind a chat user to an employee. Any previous binding of the same chat
/// user is cleared first so the platform id stays unique.
pub async fn bind_chat_user(pool: &PgPool, employee_id: Uuid, chat_user_id: i64) -> Result<()> {
    let mut tx = pool.begin().await.context("bind_chat_user begin failed")?;

    sqlx::query(
        r#"
        update employee
        set chat_user_id = null
        where chat_user_id = $1
        "#,
    )
    .bind(chat_user_id)
    .execute(&mut *tx)
    .await
    .context("bind_chat_user unbind failed")?;

    sqlx::query(
        r#"
        update employee
        set chat_user_id = $2
        where id = $1
        "#,
    )
    .bind(employee_id)
    .bind(chat_user_id)
    .execute(&mut *tx)
    .await
    .context("bind_chat_user bind failed")?;

    tx.commit().await.context("bind_chat_user commit failed")?;
    Ok(())
}

pub async fn set_employee_department(
    pool: &PgPool,
    employee_id: Uuid,
    department_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"
        update employee
        set department_id = $2
        where id = $1
        "#,
    )
    .bind(employee_id)
    .bind(department_id)
    .execute(pool)
    .await
    .context("set_employee_department failed")?;

    Ok(())
}
