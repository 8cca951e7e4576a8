//! Prompt construction for analysis jobs.
//!
//! A prompt is a pure function of the job row, so a retried job sends
//! exactly the text its first attempt sent.

use skald_core::job::{AnalysisJob, JobContext};

/// Response contract appended to every prompt. `summary` is the field
/// [`crate::payload::extract_payload`] requires.
const RESPONSE_FORMAT: &str = "Respond with a single JSON object and nothing else \
(no code fences, no prose around it).\n\
Required field: \"summary\" (2-4 sentences).\n\
Optional fields: \"topics\" (array of strings), \"decisions\" (array of strings), \
\"open_questions\" (array of strings), \"connections\" (array of objects with \
\"node_id\", \"relation\" and \"detail\").";

pub fn build_prompt(job: &AnalysisJob) -> String {
    let mut prompt = format!(
        "You are Skald, an analyst of coding-agent conversation logs.\n\n\
         Session file: {}\n",
        job.session_file
    );
    prompt.push_str(&segment_lines(job));
    prompt.push('\n');
    prompt.push_str(&task_instruction(job));
    prompt.push_str("\n\n");
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

fn segment_lines(job: &AnalysisJob) -> String {
    match (&job.segment_start, &job.segment_end) {
        (Some(start), Some(end)) => format!("Segment: entries {start} through {end}\n"),
        (Some(start), None) => format!("Segment: entries from {start} to the end of file\n"),
        (None, Some(end)) => format!("Segment: entries up to {end}\n"),
        (None, None) => String::new(),
    }
}

fn task_instruction(job: &AnalysisJob) -> String {
    match &job.context {
        JobContext::UserRequested => "Read the session file and analyze the whole conversation: \
             what was worked on, what was decided, and what remains open."
            .to_string(),
        JobContext::Segment {
            reason,
            boundary_kind,
        } => {
            let mut text = format!(
                "Read the session file and analyze the conversation segment above. \
                 The segment was closed because: {reason}."
            );
            if let Some(kind) = boundary_kind {
                text.push_str(&format!(" Boundary kind: {kind}."));
            }
            text.push_str(
                " Summarize what was worked on, what was decided, and what remains open.",
            );
            text
        }
        JobContext::Reanalysis {
            node_id,
            node_version,
            analyzer_version,
        } => format!(
            "Re-analyze the conversation segment above. An earlier analysis exists as node \
             {node_id} (version {node_version}); produce an improved analysis for analyzer \
             version {analyzer_version}. Focus on decisions and open questions the earlier \
             pass may have missed."
        ),
        JobContext::ConnectionDiscovery { node_id } => format!(
            "Starting from analysis node {node_id}, look for connections between this session \
             and other recently analyzed sessions: shared topics, continued work, and \
             contradicting decisions. Report them in the \"connections\" field."
        ),
    }
}
