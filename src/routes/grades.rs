//! Grade attestation routes
//!
//! - POST /api/grades                 create a grade (teacher)
//! - GET  /api/grades/{id}            read a grade (teacher)
//! - POST /api/grades/{id}/attest     anchor the grade on the ledger
//! - POST /api/grades/{id}/verify     verify against the ledger and settle status
//! - PUT  /api/grades/{id}/score      edit the score, re-attesting if needed

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;

use crate::auth::Session;
use crate::routes::{json_response, read_json};
use crate::server::AppState;
use crate::services::{Actor, NewGrade};
use crate::types::Result;

pub async fn handle_create_grade(
    state: &AppState,
    session: &Session,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("create_grade")?;
    let input: NewGrade = read_json(req).await?;
    let grade = state.grades.create_grade(input, session).await?;
    Ok(json_response(StatusCode::CREATED, &grade))
}

pub async fn handle_get_grade(
    state: &AppState,
    session: &Session,
    grade_id: &str,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("read_grade")?;
    let grade = state.grades.get_grade(grade_id).await?;
    Ok(json_response(StatusCode::OK, &grade))
}

pub async fn handle_attest(
    state: &AppState,
    session: &Session,
    actor: &Actor,
    grade_id: &str,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("attest_grade")?;
    let result = state.grades.attest_grade(grade_id, session, actor).await?;
    Ok(json_response(StatusCode::OK, &result))
}

pub async fn handle_verify_grade(
    state: &AppState,
    session: &Session,
    actor: &Actor,
    grade_id: &str,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("verify_grade")?;
    let result = state
        .grades
        .verify_grade_record(grade_id, session, actor)
        .await?;
    Ok(json_response(StatusCode::OK, &result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub score: i64,
}

pub async fn handle_edit_score(
    state: &AppState,
    session: &Session,
    actor: &Actor,
    grade_id: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("edit_score")?;
    let body: ScoreRequest = read_json(req).await?;
    let result = state
        .grades
        .edit_score(grade_id, body.score, session, actor)
        .await?;
    Ok(json_response(StatusCode::OK, &result))
}

/// Split `/api/grades/{id}/{action}` into id and action (empty for none)
pub fn parse_grade_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/api/grades/")?;
    let (id, action) = rest.split_once('/').unwrap_or((rest, ""));
    if id.is_empty() || action.contains('/') {
        return None;
    }
    Some((id, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grade_path() {
        assert_eq!(parse_grade_path("/api/grades/g1/attest"), Some(("g1", "attest")));
        assert_eq!(parse_grade_path("/api/grades/g1"), Some(("g1", "")));
        assert_eq!(parse_grade_path("/api/grades/"), None);
        assert_eq!(parse_grade_path("/api/grades/g1/score/extra"), None);
        assert_eq!(parse_grade_path("/api/other/g1"), None);
    }
}
