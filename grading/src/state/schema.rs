//! Column family definitions for the RocksDB paper store
//!
//! Each column family provides logical separation of data types
//! while sharing the same RocksDB instance.

/// Column family for papers
pub const CF_PAPERS: &str = "papers";

/// Column family for topics
pub const CF_TOPICS: &str = "topics";

/// Column family for live assignments
pub const CF_ASSIGNMENTS: &str = "assignments";

/// Column family for retired assignment tombstones
pub const CF_RETIRED: &str = "retired";

/// Column family for score records and their id index
pub const CF_RECORDS: &str = "records";

/// Column family for calibration cohorts
pub const CF_COHORTS: &str = "cohorts";

/// Column family for per-grader cursors (cohort progress, self-check windows)
pub const CF_GRADERS: &str = "graders";

/// All column family names
pub const ALL_CFS: &[&str] = &[
    CF_PAPERS,
    CF_TOPICS,
    CF_ASSIGNMENTS,
    CF_RETIRED,
    CF_RECORDS,
    CF_COHORTS,
    CF_GRADERS,
];

/// Key prefixes for compound keys
///
/// Numeric ids are zero-padded so lexicographic order matches numeric order.
/// Ids are expected to be non-negative.
pub mod keys {
    pub const PAPER_PREFIX: &str = "paper:";
    pub const TOPIC_PREFIX: &str = "topic:";
    pub const ASSIGNMENT_PREFIX: &str = "asg:";
    pub const RECORD_PREFIX: &str = "rec:";
    pub const COHORT_PREFIX: &str = "cohort:";

    pub fn paper(paper_id: i64) -> String {
        format!("paper:{:020}", paper_id)
    }

    pub fn topic(topic_id: i64) -> String {
        format!("topic:{:020}", topic_id)
    }

    pub fn assignment(assignment_id: &str) -> String {
        format!("asg:{}", assignment_id)
    }

    pub fn retired(assignment_id: &str) -> String {
        format!("ret:{}", assignment_id)
    }

    /// Record key, ordered by grader then time
    pub fn record(grader_id: i64, timestamp_nanos: i64, record_id: &str) -> String {
        format!("rec:{:020}:{:020}:{}", grader_id, timestamp_nanos, record_id)
    }

    /// Prefix covering every record of one grader
    pub fn grader_records(grader_id: i64) -> String {
        format!("rec:{:020}:", grader_id)
    }

    /// Index from record id to its primary key
    pub fn record_index(record_id: &str) -> String {
        format!("rec_idx:{}", record_id)
    }

    pub fn cohort(cohort_id: i64) -> String {
        format!("cohort:{:020}", cohort_id)
    }

    pub fn cohort_progress(grader_id: i64) -> String {
        format!("cprog:{:020}", grader_id)
    }

    pub fn self_check_cursor(grader_id: i64) -> String {
        format!("qc:{:020}", grader_id)
    }

    /// Parse the cohort id out of a cohort key
    pub fn parse_cohort_id(key: &str) -> Option<i64> {
        key.strip_prefix(COHORT_PREFIX)?.parse().ok()
    }
}
