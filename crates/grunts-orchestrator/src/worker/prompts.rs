//! Specialized system prompt assembly for a single worker (§4.E `analyzing`).
//!
//! Built the same way the lineage's `format_task_prompt` builds a task
//! prompt from a work packet: plain string concatenation over fixed
//! sections, no templating engine.

use grunts_core::scorer::ScoreResult;

/// Everything the prompt builder needs, mirroring `WorkerSpec` (§3) plus the
/// task handed down from the Orchestrator's decomposition step.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub worker_id: &'a str,
    pub specialization_tag: &'a str,
    pub technologies: &'a [String],
    pub task: &'a str,
}

/// Build the base system prompt for the `analyzing` phase (once per worker,
/// before the first `coding` iteration).
pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# Worker {} — {}\n\n",
        ctx.worker_id, ctx.specialization_tag
    ));

    if !ctx.technologies.is_empty() {
        prompt.push_str("## Technologies\n");
        for tech in ctx.technologies {
            prompt.push_str(&format!("- {tech}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str("## Task\n");
    prompt.push_str(ctx.task.trim());
    prompt.push('\n');

    prompt
}

/// Build the next iteration's prompt by appending one iteration's structured
/// feedback (§4.E "next iteration's prompt"). Delegates the context-window-
/// aware eviction to the scorer's own `append_feedback`, since that is where
/// the budget and oldest-block-eviction bookkeeping already lives.
pub fn next_iteration_prompt(
    base_prompt: &str,
    feedback_blocks: &mut Vec<String>,
    result: &ScoreResult,
    context_window_chars: usize,
) -> String {
    grunts_core::scorer::append_feedback(base_prompt, feedback_blocks, result, context_window_chars)
}
