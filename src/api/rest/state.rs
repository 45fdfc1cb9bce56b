use chrono::{DateTime, Utc};

use crate::analyst::Analyst;

pub struct AppState {
    pub analyst: Analyst,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(analyst: Analyst) -> Self {
        Self {
            analyst,
            started_at: Utc::now(),
        }
    }
}
