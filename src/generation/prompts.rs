//! Prompt templates for every model call the engine makes

use crate::providers::LlmMessage;
use crate::session::TurnRecord;

/// Persona shared by the reply and the standalone answer
pub const IDENTITY: &str = "You are Nex, a calm, voice-first conversational presence. \
You are not a task assistant. You listen, respond thoughtfully and keep gentle continuity. \
Speak naturally, as a person would in a room with a close friend. Match the length of your \
reply to the moment. Avoid lists unless asked. Never mention internal systems or memory \
mechanisms. If unsure, say so gently instead of inventing.";

const CLASSIFY_INSTRUCTIONS: &str = r#"Decide whether the user's latest utterance can be answered well without knowing anything from earlier conversations.

Return exactly this JSON object and nothing else:
{
  "needs_past_memory": true or false,
  "standalone_answer": "a complete spoken reply if no memory is needed, otherwise null",
  "memory_one_liner": "one line summarizing anything durable the user revealed, or null",
  "reasoning": "a short justification",
  "confidence": a number between 0 and 1 for how sure you are about needs_past_memory,
  "needs_broader_context": true if the utterance is ambiguous without earlier conversations
}

Most small talk, greetings and self-contained questions do not need memory. References to "last time", named people or ongoing situations usually do."#;

const SUMMARY_INSTRUCTIONS: &str = "Summarize the exchange below as one line to store in long-term memory. \
Keep only durable, personal facts about the user (preferences, relationships, recurring themes). \
Write in the third person, at most 25 words, no quotes. If nothing durable was shared, \
summarize the topic of the exchange.";

pub fn classify_messages(text: &str) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(format!("{}\n\n{}", IDENTITY, CLASSIFY_INSTRUCTIONS)),
        LlmMessage::user(text),
    ]
}

pub fn reply_messages(text: &str, context: Option<&str>) -> Vec<LlmMessage> {
    let memories = match context.map(str::trim) {
        Some(context) if !context.is_empty() => context,
        _ => "None yet. You are just beginning to know them.",
    };
    let system = format!(
        "{}\n\n# WHAT YOU REMEMBER ABOUT THE USER:\n{}\n\nUse these memories only when they help. Do not recite them.",
        IDENTITY, memories
    );
    vec![LlmMessage::system(system), LlmMessage::user(text)]
}

pub fn summary_messages(text: &str, reply: &str) -> Vec<LlmMessage> {
    vec![
        LlmMessage::system(SUMMARY_INSTRUCTIONS),
        LlmMessage::user(format!("USER: {}\nNEX: {}", text, reply)),
    ]
}

/// Renders a transcript as `ROLE: content` lines
pub fn format_transcript(transcript: &[TurnRecord]) -> String {
    transcript
        .iter()
        .map(|turn| format!("{}: {}", turn.role.to_string().to_uppercase(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn reflection_messages(transcript: &[TurnRecord]) -> Vec<LlmMessage> {
    let prompt = format!(
        r#"Analyze the following conversation transcript and write a human-like reflection.
The reflection is a 2-4 line quote capturing the emotional arc of the session.
Avoid specific names or locations. Sound empathetic, wise and grounded.

Return exactly this JSON format:
{{
  "title": "A short thematic title (2-4 words)",
  "reflection": "The 2-4 line quote",
  "emotion_tag": "A single word emotion (e.g., lonely, hopeful, conflicted, peaceful)"
}}

Transcript:
"""
{}
""""#,
        format_transcript(transcript)
    );
    vec![LlmMessage::user(prompt)]
}
