//! Drives a single worker's `WorkerStateMachine` through the
//! `analyzing → coding ⇄ validating → completed | failed` cycle (§4.E),
//! calling the Tool Request Pipeline once per `coding` iteration and the
//! scorer once per `validating` iteration.

use grunts_core::{
    ConversationStore, PipelineError, ProviderRegistry, ScoreResult,
    WorkerLoopState,
};
use grunts_core::pipeline::{ModelCategory, ToolRequest, ToolRequestPipeline, ToolSpec};
use grunts_core::provider::CompletionProvider;

use super::prompts::{build_system_prompt, next_iteration_prompt, PromptContext};
use super::state_machine::{WorkerPhase, WorkerStateMachine};

/// The outcome of a completed or failed worker run, handed to the
/// completion-artifact writer and to the Status Plane.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub phase: WorkerPhase,
    pub best_score: u8,
    pub best_code: String,
    pub iterations: u32,
    pub abort_reason: Option<String>,
}

/// Poll checked between iterations and before each provider call (§5
/// cancellation). A real worker process wires this to an `AtomicBool`
/// flipped by its `POST /cancel` handler.
pub trait CancelSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancelSignal for std::sync::atomic::AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Receives progress updates as the driver advances, so the HTTP Status
/// Plane can serve a live `WorkerStatusView` without the driver itself
/// depending on `axum`.
pub trait StatusSink: Send + Sync {
    fn report(&self, phase: WorkerPhase, iteration: u32, best_score: u8, consecutive_failures: u32);
}

impl StatusSink for () {
    fn report(&self, _phase: WorkerPhase, _iteration: u32, _best_score: u8, _consecutive_failures: u32) {}
}

pub struct WorkerDriver<'a> {
    pub registry: &'a ProviderRegistry,
    pub store: &'a dyn ConversationStore,
    pub provider: &'a dyn CompletionProvider,
    pub config: &'a grunts_core::Config,
}

impl<'a> WorkerDriver<'a> {
    /// Run one worker to completion or failure. Returns `Ok` for both
    /// `completed` and `failed` outcomes — a worker giving up cleanly is not
    /// itself an error (§4.F "individual worker failure does not abort the
    /// run"); only pipeline/registry errors that prevent the loop from even
    /// starting propagate as `Err`.
    pub async fn run(
        &self,
        ctx: PromptContext<'_>,
        model: &str,
        max_iterations: u32,
        cancel: &dyn CancelSignal,
        status: &dyn StatusSink,
    ) -> Result<WorkerOutcome, PipelineError> {
        let mut machine = WorkerStateMachine::new();
        let mut loop_state = WorkerLoopState::new(max_iterations);
        let mut feedback_blocks: Vec<String> = Vec::new();

        machine
            .advance(WorkerPhase::Analyzing, None)
            .expect("initializing -> analyzing is always legal");
        let system_prompt = build_system_prompt(&ctx);
        let capabilities = self.registry.get_provider_for_model(model)?;

        let tool = ToolSpec {
            name: format!("worker-{}", ctx.worker_id),
            system_prompt: system_prompt.clone(),
            model_category: ModelCategory::Reasoning,
            declares_image_input: false,
            follow_up_suggestions: vec![],
        };
        let pipeline = ToolRequestPipeline {
            config: self.config,
            registry: self.registry,
            store: self.store,
            provider: self.provider,
        };

        let mut task_prompt = ctx.task.to_string();
        let mut continuation_id: Option<String> = None;

        machine
            .advance(WorkerPhase::Coding, None)
            .expect("analyzing -> coding is always legal");

        loop {
            if cancel.is_cancelled() {
                machine.fail("cancelled").ok();
                return Ok(WorkerOutcome {
                    phase: machine.current(),
                    best_score: loop_state.best_score,
                    best_code: loop_state.best_code,
                    iterations: loop_state.current_iteration,
                    abort_reason: Some("cancelled".to_string()),
                });
            }

            let response = pipeline
                .handle(
                    &tool,
                    ToolRequest {
                        prompt: task_prompt.clone(),
                        model: Some(model.to_string()),
                        temperature: None,
                        continuation_id: continuation_id.clone(),
                        has_images: false,
                    },
                )
                .await?;
            continuation_id = response
                .continuation_offer
                .as_ref()
                .map(|o| o.thread_id.clone());

            machine
                .advance(WorkerPhase::Validating, None)
                .expect("coding -> validating is always legal");

            let result: ScoreResult = grunts_core::scorer::score(&response.content, ctx.task);
            machine.set_iteration(loop_state.current_iteration + 1);

            let cancelled_now = cancel.is_cancelled();
            let decision = loop_state.record_iteration(cancelled_now, &result);
            status.report(
                machine.current(),
                loop_state.current_iteration,
                loop_state.best_score,
                loop_state.consecutive_failures,
            );

            match decision {
                grunts_core::LoopDecision::Complete => {
                    machine
                        .advance(
                            WorkerPhase::Completed,
                            Some(&format!("score {}", result.score)),
                        )
                        .expect("validating -> completed is always legal");
                    status.report(
                        machine.current(),
                        loop_state.current_iteration,
                        loop_state.best_score,
                        loop_state.consecutive_failures,
                    );
                    return Ok(WorkerOutcome {
                        phase: machine.current(),
                        best_score: loop_state.best_score,
                        best_code: loop_state.best_code,
                        iterations: loop_state.current_iteration,
                        abort_reason: None,
                    });
                }
                grunts_core::LoopDecision::Abort(reason) => {
                    machine.fail(&format!("{reason:?}")).ok();
                    status.report(
                        machine.current(),
                        loop_state.current_iteration,
                        loop_state.best_score,
                        loop_state.consecutive_failures,
                    );
                    return Ok(WorkerOutcome {
                        phase: machine.current(),
                        best_score: loop_state.best_score,
                        best_code: loop_state.best_code,
                        iterations: loop_state.current_iteration,
                        abort_reason: Some(format!("{reason:?}")),
                    });
                }
                grunts_core::LoopDecision::Continue => {
                    task_prompt = next_iteration_prompt(
                        &ctx.task.to_string(),
                        &mut feedback_blocks,
                        &result,
                        capabilities.context_window as usize,
                    );
                    machine
                        .advance(WorkerPhase::Coding, None)
                        .expect("validating -> coding is always legal");
                }
            }
        }
    }
}
