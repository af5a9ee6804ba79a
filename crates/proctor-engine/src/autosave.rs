use tracing::debug;

use proctor_core::ids::QuestionId;
use proctor_store::answers::{AnswerRepo, AnswerRow};

use crate::actor::SessionContext;
use crate::error::EngineError;

pub(crate) async fn save(
    ctx: &SessionContext,
    question_id: QuestionId,
    selected_answer: Option<String>,
) -> Result<AnswerRow, EngineError> {
    let row = ctx
        .store(move |db, id| AnswerRepo::new(db).save(id, &question_id, selected_answer.as_deref()))
        .await?;
    debug!(question_id = %row.question_id, "answer saved");
    Ok(row)
}

pub(crate) async fn save_bulk(
    ctx: &SessionContext,
    answers: Vec<(QuestionId, Option<String>)>,
) -> Result<usize, EngineError> {
    let count = ctx
        .store(move |db, id| AnswerRepo::new(db).save_bulk(id, &answers))
        .await?;
    debug!(count, "answers saved");
    Ok(count)
}
