use std::sync::Arc;

use plan_engine::Engine;

use crate::planner::Planner;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub planner: Arc<dyn Planner>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, planner: Arc<dyn Planner>) -> Self {
        Self { engine, planner }
    }
}
