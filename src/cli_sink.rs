//! Sink used by the headless driver
//!
//! Feeds frames back into the engine, records timing recommendations and
//! optionally echoes every frame as JSON.

use anyhow::{Context, Result};
use std::sync::Arc;

use traffic_signal_sim::simulation::{
    AnalyticsSink, EngineFeedbackSink, SessionId, SimulationEngine, VideoAnalytics,
};

pub struct ReportingSink {
    feedback: EngineFeedbackSink,
    engine: Arc<SimulationEngine>,
    session_id: SessionId,
    json: bool,
}

impl ReportingSink {
    pub fn new(engine: Arc<SimulationEngine>, session_id: SessionId, json: bool) -> Self {
        Self {
            feedback: EngineFeedbackSink::new(Arc::clone(&engine), session_id),
            engine,
            session_id,
            json,
        }
    }
}

impl AnalyticsSink for ReportingSink {
    fn deliver(&self, road_name: &str, analytics: &VideoAnalytics) -> Result<()> {
        self.feedback.deliver(road_name, analytics)?;
        self.engine
            .recommend_timing(self.session_id, road_name, analytics);

        if self.json {
            let line = serde_json::to_string(analytics).context("Failed to encode analytics")?;
            println!("{}", line);
        }
        Ok(())
    }
}
