//! Role checks for requests that carry an `actorId`.
//!
//! Requests without an actor are trusted: authenticating the user is the
//! host application's job. With an actor, admins may do anything and
//! teachers only touch the courses they own.

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use super::error::HandlerErr;
use super::helpers::optional_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub fn resolve_actor(conn: &Connection, params: &Value) -> Result<Option<Actor>, HandlerErr> {
    let Some(actor_id) = optional_str(params, "actorId")? else {
        return Ok(None);
    };
    let role: Option<String> = conn
        .query_row("SELECT role FROM teachers WHERE id = ?", [&actor_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(role) = role else {
        return Err(HandlerErr::forbidden("unknown actor"));
    };
    let role = Role::parse(&role)
        .ok_or_else(|| HandlerErr::new("db_query_failed", format!("invalid role: {}", role)))?;
    Ok(Some(Actor { id: actor_id, role }))
}

pub fn require_admin(actor: Option<&Actor>) -> Result<(), HandlerErr> {
    match actor {
        Some(a) if !a.is_admin() => Err(HandlerErr::forbidden("admin role required")),
        _ => Ok(()),
    }
}

/// Returns the course's class group id.
pub fn require_course_access(
    conn: &Connection,
    actor: Option<&Actor>,
    course_id: &str,
) -> Result<String, HandlerErr> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT teacher_id, class_group_id FROM courses WHERE id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((teacher_id, class_group_id)) = row else {
        return Err(HandlerErr::not_found("course"));
    };
    if let Some(a) = actor {
        if !a.is_admin() && a.id != teacher_id {
            return Err(HandlerErr::forbidden("course belongs to another teacher"));
        }
    }
    Ok(class_group_id)
}

#[derive(Debug, Clone)]
pub struct SessionScope {
    pub course_id: String,
    pub class_group_id: String,
    pub cancelled: bool,
}

pub fn require_session_access(
    conn: &Connection,
    actor: Option<&Actor>,
    session_id: &str,
) -> Result<SessionScope, HandlerErr> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT course_id, cancelled FROM sessions WHERE id = ?",
            [session_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((course_id, cancelled)) = row else {
        return Err(HandlerErr::not_found("session"));
    };
    let class_group_id = require_course_access(conn, actor, &course_id)?;
    Ok(SessionScope {
        course_id,
        class_group_id,
        cancelled: cancelled != 0,
    })
}

pub fn require_teacher_scope(actor: Option<&Actor>, teacher_id: &str) -> Result<(), HandlerErr> {
    match actor {
        Some(a) if !a.is_admin() && a.id != teacher_id => {
            Err(HandlerErr::forbidden("cannot act for another teacher"))
        }
        _ => Ok(()),
    }
}
