//! Mission orchestration: one blocking worker per mission, events out
//! through a channel, cancellation in through a token.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::brain::{Brain, Decision};
use crate::config::AgentSettings;
use crate::error::MissionError;
use crate::extractor::DataExtractor;
use crate::goal;
use crate::hands::PageDriver;
use crate::memory::VisitLedger;
use crate::registry::{MissionRecord, MissionRegistry, MissionState};
use crate::types::{ActionCommand, ActionOutcome, ExtractedRecord, PageState};

/// Events streamed to the consumer, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionEvent {
    Status {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    #[serde(rename = "action")]
    ActionTaken {
        iteration: u32,
        thought_process: String,
        reasoning: String,
        action: ActionCommand,
        result: ActionOutcome,
        is_goal_achieved: bool,
        url: String,
        extracted_data_count: usize,
        sources_visited: usize,
    },
    Error {
        message: String,
    },
    Complete {
        summary: String,
        extracted_data: Vec<ExtractedRecord>,
        total_iterations: u32,
    },
    Incomplete {
        message: String,
        summary: String,
        extracted_data: Vec<ExtractedRecord>,
        total_iterations: u32,
    },
    Finished,
}

impl MissionEvent {
    /// Terminal events end the useful part of the stream; `Finished` follows.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionEvent::Complete { .. }
                | MissionEvent::Incomplete { .. }
                | MissionEvent::Error { .. }
        )
    }
}

/// Consumer side of a launched mission.
pub struct MissionStream {
    pub id: Uuid,
    pub events: mpsc::UnboundedReceiver<MissionEvent>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl MissionStream {
    pub async fn next(&mut self) -> Option<MissionEvent> {
        self.events.recv().await
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Start the worker for a `Created` mission.
///
/// Must be called from within a tokio runtime. A mission that is already
/// running is rejected with [`MissionError::AlreadyRunning`].
pub fn launch(
    registry: &MissionRegistry,
    id: Uuid,
    driver: Box<dyn PageDriver>,
    extractor: Arc<dyn DataExtractor>,
    settings: Arc<AgentSettings>,
) -> Result<MissionStream, MissionError> {
    let (record, cancel) = registry.begin_run(id)?;
    let (events, rx) = mpsc::unbounded_channel();

    let worker = Worker {
        registry: registry.clone(),
        record,
        driver,
        extractor,
        settings,
        events,
        cancel: cancel.clone(),
    };

    tracing::info!(mission_id = %id, "launching mission worker");
    let handle = tokio::task::spawn_blocking(move || worker.run());

    Ok(MissionStream {
        id,
        events: rx,
        cancel,
        handle,
    })
}

enum Ending {
    Complete,
    Incomplete,
    Cancelled,
}

struct Worker {
    registry: MissionRegistry,
    record: MissionRecord,
    driver: Box<dyn PageDriver>,
    extractor: Arc<dyn DataExtractor>,
    settings: Arc<AgentSettings>,
    events: mpsc::UnboundedSender<MissionEvent>,
    cancel: CancellationToken,
}

impl Worker {
    fn run(mut self) {
        let span = tracing::info_span!("mission", mission_id = %self.record.id);
        let _entered = span.enter();

        // A panic in the driver or the engine must still end in `Failed`
        // followed by `finished`, with the browser released.
        let ending = panic::catch_unwind(AssertUnwindSafe(|| self.drive()))
            .unwrap_or_else(|payload| {
                Err(anyhow!("worker panicked: {}", panic_message(&*payload)))
            });
        match panic::catch_unwind(AssertUnwindSafe(|| self.driver.stop())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %format!("{e:#}"), "failed to release browser"),
            Err(payload) => {
                tracing::warn!(panic = %panic_message(&*payload), "browser release panicked")
            }
        }

        let (state, error) = match ending {
            Ok(Ending::Complete) => (MissionState::Complete, None),
            Ok(Ending::Incomplete) => (MissionState::Incomplete, None),
            Ok(Ending::Cancelled) => {
                tracing::info!("mission cancelled");
                self.emit(MissionEvent::Status {
                    message: "Mission cancelled".to_string(),
                    url: None,
                });
                (MissionState::Cancelled, None)
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(error = %message, "mission failed");
                self.emit(MissionEvent::Error {
                    message: format!("Mission failed: {message}"),
                });
                (MissionState::Failed, Some(message))
            }
        };

        self.update_record(|r| {
            r.state = state;
            r.error = error;
        });
        tracing::info!(%state, "mission finished");
        self.emit(MissionEvent::Finished);
    }

    fn drive(&mut self) -> anyhow::Result<Ending> {
        let max_iterations = self.record.config.max_iterations;
        let brain = Brain::new(
            self.settings.clone(),
            max_iterations,
            self.record.config.min_sources,
        );
        let mut ledger = VisitLedger::new(self.record.config.loop_threshold);

        self.driver.start().context("failed to start browser")?;
        let home = self.settings.search_home_url.clone();
        let landing = self
            .driver
            .goto(&home)
            .with_context(|| format!("failed to open {home}"))?;
        self.emit(MissionEvent::Status {
            message: "Mission started".to_string(),
            url: Some(landing.url.unwrap_or(home)),
        });

        let intent = goal::analyze(&self.record.goal);
        tracing::debug!(?intent, "goal analyzed");

        let mut iteration = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Ending::Cancelled);
            }
            iteration += 1;

            let state = self
                .driver
                .page_state()
                .context("failed to read page state")?;
            let Decision {
                thought_process,
                reasoning,
                action,
                goal_achieved,
                records,
                new_source,
            } = brain.decide(&state, &ledger, &intent, iteration, self.extractor.as_ref());

            for record in records {
                ledger.record_extraction(record);
            }
            if let Some(source) = &new_source {
                ledger.mark_source(source);
            }

            let result = execute(
                self.driver.as_mut(),
                self.extractor.as_ref(),
                &action,
                &state,
                &mut ledger,
            );
            let current_url = result.url.clone().unwrap_or_else(|| state.url.clone());
            if !action.is_finish() {
                let at = match &action {
                    ActionCommand::Goto { url } => url.as_str(),
                    _ => current_url.as_str(),
                };
                ledger.record_action(&action, at, outcome_label(&result));
            }

            tracing::info!(
                iteration,
                action = action.name(),
                success = result.success,
                sources = ledger.sources().len(),
                "{thought_process}"
            );

            self.update_record(|r| {
                r.iterations = iteration;
                r.sources_visited = ledger.sources().len();
                r.data_points = ledger.extracted().len();
            });

            let finished = action.is_finish();
            self.emit(MissionEvent::ActionTaken {
                iteration,
                thought_process,
                reasoning,
                action,
                result,
                is_goal_achieved: goal_achieved,
                url: current_url,
                extracted_data_count: ledger.extracted().len(),
                sources_visited: ledger.sources().len(),
            });

            if goal_achieved {
                self.emit(MissionEvent::Complete {
                    summary: ledger.summary(),
                    extracted_data: ledger.extracted().to_vec(),
                    total_iterations: iteration,
                });
                return Ok(Ending::Complete);
            }
            if finished || iteration >= max_iterations {
                self.emit(MissionEvent::Incomplete {
                    message: "Max iterations reached".to_string(),
                    summary: ledger.summary(),
                    extracted_data: ledger.extracted().to_vec(),
                    total_iterations: iteration,
                });
                return Ok(Ending::Incomplete);
            }
        }
    }

    fn emit(&self, event: MissionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    fn update_record<F>(&self, f: F)
    where
        F: FnOnce(&mut MissionRecord),
    {
        if let Err(e) = self.registry.update(self.record.id, f) {
            tracing::debug!(error = %e, "mission record gone, skipping update");
        }
    }
}

/// Run one action against the driver. Driver errors become failed outcomes.
fn execute(
    driver: &mut dyn PageDriver,
    extractor: &dyn DataExtractor,
    action: &ActionCommand,
    state: &PageState,
    ledger: &mut VisitLedger,
) -> ActionOutcome {
    let result = match action {
        ActionCommand::Goto { url } => driver.goto(url),
        ActionCommand::Click { selector } => driver.click(selector),
        ActionCommand::Type {
            selector,
            text,
            press_enter,
        } => driver.type_text(selector, text, *press_enter),
        ActionCommand::Scroll { direction } => driver.scroll(*direction),
        ActionCommand::Wait { seconds } => driver.wait(*seconds),
        ActionCommand::Extract { fields } => {
            let record = extractor.extract_structured_data(state, fields);
            if !state.url.is_empty() {
                ledger.mark_source(&state.url);
            }
            let data = Value::Object(record.fields.clone());
            ledger.record_extraction(record);
            Ok(ActionOutcome {
                data: Some(data),
                ..ActionOutcome::at(state.url.clone())
            })
        }
        ActionCommand::Finish { summary } => Ok(ActionOutcome {
            summary: Some(summary.clone()),
            ..ActionOutcome::ok()
        }),
    };

    result.unwrap_or_else(|e| {
        let message = format!("{e:#}");
        tracing::warn!(action = action.name(), error = %message, "action failed");
        ActionOutcome::failed(message)
    })
}

fn outcome_label(outcome: &ActionOutcome) -> String {
    match (&outcome.error, outcome.success) {
        (_, true) => "success".to_string(),
        (Some(e), false) => format!("failed: {e}"),
        (None, false) => "failed".to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
