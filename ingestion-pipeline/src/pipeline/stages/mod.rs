use common::error::AppError;
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};

use super::{
    context::{ExtractionSummary, PaperContext},
    state::{Extracted, PaperMachine, Persisted, Ready, Scheduled},
    PaperUpload,
};

#[instrument(level = "trace", skip_all, fields(filename = %ctx.filename))]
pub async fn extract(
    machine: PaperMachine<(), Ready>,
    ctx: &mut PaperContext<'_>,
    upload: &PaperUpload,
) -> Result<PaperMachine<(), Extracted>, AppError> {
    let extracted = ctx.services.extract(upload).await?;
    let summary = ExtractionSummary::of(&extracted);

    info!(
        filename = %ctx.filename,
        bytes = upload.bytes.len(),
        pages = summary.page_count,
        chunks = summary.chunk_count,
        empty_pages = summary.pages_without_text.len(),
        "paper text extracted"
    );

    ctx.summary = summary;
    ctx.extracted = Some(extracted);

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(level = "trace", skip_all, fields(filename = %ctx.filename))]
pub async fn persist(
    machine: PaperMachine<(), Extracted>,
    ctx: &mut PaperContext<'_>,
    upload: &PaperUpload,
) -> Result<PaperMachine<(), Persisted>, AppError> {
    let paper = ctx.services.persist(upload, ctx.extracted()?).await?;
    debug!(paper_id = %paper.id, folder_id = ?paper.folder_id, "paper persisted");
    ctx.paper = Some(paper);

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

/// Hands the chunks to indexing and the text to analysis; both run detached.
#[instrument(level = "trace", skip_all, fields(filename = %ctx.filename))]
pub async fn schedule(
    machine: PaperMachine<(), Persisted>,
    ctx: &mut PaperContext<'_>,
) -> Result<PaperMachine<(), Scheduled>, AppError> {
    let extracted = ctx.take_extracted()?;
    let paper = ctx.paper()?;

    ctx.services
        .schedule_indexing(paper, extracted.chunks)
        .await?;
    ctx.services
        .schedule_analysis(paper, extracted.full_text)
        .await?;

    machine
        .schedule()
        .map_err(|(_, guard)| map_guard_error("schedule", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid paper pipeline transition during {event}: {guard:?}"
    ))
}
