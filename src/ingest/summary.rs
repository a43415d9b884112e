use serde::{Deserialize, Serialize};

use crate::flight_plans::RawRecord;
use crate::message_parser::{RowRejection, has_actual_marker, has_plan_marker};

/// Error messages kept in a summary; `error_count` keeps counting past it
pub const MAX_ERROR_MESSAGES: usize = 1_000;

/// Per-row validation breakdown for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStats {
    pub total_rows: usize,
    pub valid_plan: usize,
    pub valid_departure: usize,
    pub valid_arrival: usize,
    pub complete_flights: usize,
    pub incomplete_flights: usize,
    pub parsing_errors: usize,
    /// Plan present, both actual messages missing
    pub only_plan: usize,
    /// Plan present, exactly one actual message missing
    pub partial_departure_arrival: usize,
    pub flights_with_actual: usize,
}

impl ValidationStats {
    /// Account for one non-blank row and how it was handled
    pub fn record(&mut self, raw: &RawRecord, outcome: Result<bool, RowRejection>) {
        self.total_rows += 1;

        let has_plan = !raw.plan_message.trim().is_empty();
        let has_departure = !raw.departure_message.trim().is_empty();
        let has_arrival = !raw.arrival_message.trim().is_empty();

        if has_plan && has_plan_marker(&raw.plan_message) {
            self.valid_plan += 1;
        }
        if has_departure && has_actual_marker(&raw.departure_message) {
            self.valid_departure += 1;
        }
        if has_arrival && has_actual_marker(&raw.arrival_message) {
            self.valid_arrival += 1;
        }
        if has_plan {
            match (has_departure, has_arrival) {
                (false, false) => self.only_plan += 1,
                (true, false) | (false, true) => self.partial_departure_arrival += 1,
                (true, true) => {}
            }
        }

        match outcome {
            Ok(with_actual) => {
                self.complete_flights += 1;
                if with_actual {
                    self.flights_with_actual += 1;
                }
            }
            Err(rejection) if rejection.is_missing_message() => self.incomplete_flights += 1,
            Err(_) => self.parsing_errors += 1,
        }
    }

    pub fn merge(&mut self, other: &ValidationStats) {
        self.total_rows += other.total_rows;
        self.valid_plan += other.valid_plan;
        self.valid_departure += other.valid_departure;
        self.valid_arrival += other.valid_arrival;
        self.complete_flights += other.complete_flights;
        self.incomplete_flights += other.incomplete_flights;
        self.parsing_errors += other.parsing_errors;
        self.only_plan += other.only_plan;
        self.partial_departure_arrival += other.partial_departure_arrival;
        self.flights_with_actual += other.flights_with_actual;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Standard,
    Streaming,
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingMode::Standard => write!(f, "standard"),
            ProcessingMode::Streaming => write!(f, "streaming"),
        }
    }
}

/// What a run did, returned to the caller and optionally written out as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Rows that parsed into a flight plan
    pub processed: usize,
    pub created: usize,
    pub actual_flights_created: usize,
    /// Rows rejected before persistence
    pub skipped: usize,
    pub duplicates: usize,
    /// Parsed rows dropped because their sub-batch failed to persist
    pub lost: usize,
    pub error_count: usize,
    pub error_messages: Vec<String>,
    pub validation_stats: ValidationStats,
    pub mode: ProcessingMode,
    /// Non-empty plan rows found while counting
    pub total_rows: usize,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn new(mode: ProcessingMode, total_rows: usize) -> Self {
        Self {
            processed: 0,
            created: 0,
            actual_flights_created: 0,
            skipped: 0,
            duplicates: 0,
            lost: 0,
            error_count: 0,
            error_messages: Vec::new(),
            validation_stats: ValidationStats::default(),
            mode,
            total_rows,
            duration_secs: 0.0,
        }
    }

    pub fn push_error(&mut self, message: String) {
        self.error_count += 1;
        if self.error_messages.len() < MAX_ERROR_MESSAGES {
            self.error_messages.push(message);
        }
    }

    pub fn reject_row(&mut self, row_number: usize, rejection: RowRejection) {
        self.skipped += 1;
        self.push_error(format!("Row {}: {}", row_number, rejection));
    }
}
