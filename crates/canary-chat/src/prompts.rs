//! Prompt templates for the two model phases

use crate::markers::{Marker, Payload};

/// System prompt for the tool-calling phase
pub fn tool_phase_system() -> String {
    format!(
        "You are a knowledge assistant that answers by calling the available tools.\n\
         Prefer tools over guessing whenever data must be read, written or charted.\n\
         \n\
         Output conventions:\n\
         1) If the question is about entities and their relationships, query the graph tools and \
         output one line:\n   {graph} {{\"nodes\":[{{\"id\",\"label\",\"type\"}}], \"edges\":[{{\"id\",\"source\",\"target\",\"label\"}}]}}\n\
         2) If the question is about numbers or trends, call the chart tool and output one line:\n   \
         {chart} {{ ...chart JSON... }}\n\
         3) A question that needs both may produce one line of each.\n\
         \n\
         Each marker starts its own line and is followed immediately by valid JSON. \
         If no structured result applies, answer in plain prose without any marker.",
        graph = Marker::Graph.sentinel(),
        chart = Marker::Chart.sentinel(),
    )
}

/// System prompt for the answer phase
pub fn answer_phase_system() -> String {
    format!(
        "You are a knowledge assistant. Structured results (graph JSON, chart JSON) have already \
         been obtained with tools. Answer the user's question in clear, concise natural language \
         based on them.\n\
         - For graph JSON, briefly describe the entities and how they relate.\n\
         - For chart JSON, describe the overall trend and conclusions in the data.\n\
         - Do not output any JSON text.\n\
         - Do not output {} or {} markers.",
        Marker::Graph.sentinel(),
        Marker::Chart.sentinel(),
    )
}

/// User prompt for the answer phase: the original question plus payloads
pub fn answer_phase_user(question: &str, payloads: &[Payload]) -> String {
    let mut prompt = format!("Original question: {question}\n");
    for payload in payloads {
        let label = match payload.marker {
            Marker::Graph => "Graph JSON",
            Marker::Chart => "Chart JSON",
        };
        prompt.push_str(&format!("{label}: {}\n", payload.json));
    }
    prompt
}
