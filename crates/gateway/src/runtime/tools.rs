//! Function tools offered to the reply model and their deterministic
//! renderers.
//!
//! Tool calls never reach the user as model free text: each recognised
//! call is rendered from a fixed template using its arguments.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use solace_domain::config::CrisisConfig;
use solace_domain::tool::{ToolCall, ToolDefinition};

pub const CRISIS_TOOL: &str = "handle_suicidal_mention";
pub const BREATHING_TOOL: &str = "suggest_breathing_exercise";
pub const EMPTY_CHAIR_TOOL: &str = "start_empty_chair";
pub const ROLE_PLAY_TOOL: &str = "facilitate_role_play";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The crisis tool is always present; exercises only when enabled.
pub fn definitions(with_exercises: bool) -> Vec<ToolDefinition> {
    let mut defs = vec![ToolDefinition {
        name: CRISIS_TOOL.into(),
        description: "Responds to mentions of suicide or self harm by providing a crisis \
                      hotline and recommending immediate in-person support."
            .into(),
        parameters: json!({
            "type": "object",
            "required": ["message", "hotline_number", "recommendation"],
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The user's message that mentions suicide or self harm."
                },
                "hotline_number": {
                    "type": "string",
                    "description": "Phone number of the crisis hotline."
                },
                "recommendation": {
                    "type": "string",
                    "description": "A short recommendation to seek an in-person therapist."
                }
            },
            "additionalProperties": false
        }),
    }];

    if with_exercises {
        defs.push(ToolDefinition {
            name: BREATHING_TOOL.into(),
            description: "Suggests a breathing exercise when the user needs to calm down or \
                          ground themselves."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["exercise_type", "duration"],
                "properties": {
                    "exercise_type": {
                        "type": "string",
                        "enum": BreathingExercise::ALL.iter().map(|e| e.as_str()).collect::<Vec<_>>()
                    },
                    "duration": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 10,
                        "description": "Duration of the exercise in minutes."
                    }
                }
            }),
        });
        defs.push(ToolDefinition {
            name: EMPTY_CHAIR_TOOL.into(),
            description: "Guides the user through an empty chair dialogue for processing \
                          relationships or internal conflicts."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["perspective", "prompt"],
                "properties": {
                    "perspective": {
                        "type": "string",
                        "enum": Perspective::ALL.iter().map(|p| p.as_str()).collect::<Vec<_>>()
                    },
                    "prompt": {
                        "type": "string",
                        "description": "The question to explore in the dialogue."
                    }
                }
            }),
        });
        defs.push(ToolDefinition {
            name: ROLE_PLAY_TOOL.into(),
            description: "Guides the user through a role-play for practising a difficult \
                          conversation."
                .into(),
            parameters: json!({
                "type": "object",
                "required": ["scenario", "role"],
                "properties": {
                    "scenario": { "type": "string" },
                    "role": {
                        "type": "string",
                        "description": "The role the assistant plays."
                    }
                }
            }),
        });
    }
    defs
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool call turned into user-facing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Crisis(String),
    Exercise(String),
}

impl Rendered {
    pub fn text(&self) -> &str {
        match self {
            Rendered::Crisis(t) | Rendered::Exercise(t) => t,
        }
    }
}

/// Render the first recognised call. A crisis call wins over exercises.
/// An exercise argument outside its enum falls back to the default
/// variant rather than dropping the call.
pub fn render(calls: &[ToolCall], crisis: &CrisisConfig) -> Option<Rendered> {
    if let Some(call) = calls.iter().find(|c| c.tool_name == CRISIS_TOOL) {
        let hotline = str_arg(&call.arguments, "hotline_number");
        let recommendation = str_arg(&call.arguments, "recommendation");
        return Some(Rendered::Crisis(crisis_message(hotline, recommendation, crisis)));
    }
    calls.iter().find_map(|call| {
        let args = &call.arguments;
        let text = match call.tool_name.as_str() {
            BREATHING_TOOL => {
                let raw = str_arg(args, "exercise_type");
                let exercise = BreathingExercise::parse(raw).unwrap_or_else(|| {
                    tracing::warn!(exercise_type = raw, "unknown breathing exercise; using default");
                    BreathingExercise::default()
                });
                breathing_text(exercise, duration_arg(args))
            }
            EMPTY_CHAIR_TOOL => {
                let raw = str_arg(args, "perspective");
                let perspective = Perspective::parse(raw).unwrap_or_else(|| {
                    tracing::warn!(perspective = raw, "unknown empty chair perspective; using default");
                    Perspective::default()
                });
                empty_chair_text(perspective, str_arg(args, "prompt"))
            }
            ROLE_PLAY_TOOL => {
                role_play_text(str_arg(args, "scenario"), str_arg(args, "role"))
            }
            other => {
                tracing::warn!(tool = other, "model called unknown tool");
                return None;
            }
        };
        Some(Rendered::Exercise(text))
    })
}

/// The fixed crisis reply. Never contains model free text.
pub fn crisis_message(hotline: &str, recommendation: &str, cfg: &CrisisConfig) -> String {
    let hotline = sanitize_hotline(hotline).unwrap_or_else(|| cfg.default_hotline.clone());
    let recommendation = match recommendation.trim() {
        "" => cfg.default_recommendation.trim(),
        r => r,
    };
    format!(
        "I'm so sorry you're feeling this way. If you ever think about harming yourself, \
         please call {hotline}. {recommendation}"
    )
    .trim_end()
    .to_owned()
}

/// Keep digits, spaces and `+-()`. `None` when no digit survives.
pub fn sanitize_hotline(raw: &str) -> Option<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')'))
        .collect();
    let kept = kept.trim();
    kept.chars()
        .any(|c| c.is_ascii_digit())
        .then(|| kept.to_owned())
}

fn str_arg<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Minutes, accepting a number or a numeric string; clamped to 1..=10.
fn duration_arg(args: &Value) -> u32 {
    let raw = match args.get("duration") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(5.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(5.0),
        _ => 5.0,
    };
    (raw.round() as i64).clamp(1, 10) as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BreathingExercise {
    Box,
    FourSevenEight,
    #[default]
    Deep,
}

impl BreathingExercise {
    const ALL: [Self; 3] = [Self::Box, Self::FourSevenEight, Self::Deep];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Box => "box-breathing",
            Self::FourSevenEight => "4-7-8",
            Self::Deep => "deep-breathing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s.trim())
    }
}

pub fn breathing_text(exercise: BreathingExercise, minutes: u32) -> String {
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    match exercise {
        BreathingExercise::Box => format!(
            "Let's do box breathing for {minutes} {unit}. Follow these steps:\n\
             1. Inhale for 4 counts\n2. Hold for 4 counts\n3. Exhale for 4 counts\n\
             4. Hold for 4 counts\n5. Repeat"
        ),
        BreathingExercise::FourSevenEight => format!(
            "Let's try the 4-7-8 technique for {minutes} {unit}:\n\
             1. Inhale for 4 counts\n2. Hold for 7 counts\n3. Exhale for 8 counts\n4. Repeat"
        ),
        BreathingExercise::Deep => format!(
            "Let's practice deep breathing for {minutes} {unit}:\n\
             1. Inhale slowly through your nose, filling your belly\n2. Hold briefly\n\
             3. Exhale slowly through your mouth\n4. Repeat"
        ),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Perspective {
    #[default]
    OtherPerson,
    FutureSelf,
    PastSelf,
    InnerCritic,
    CompassionateSelf,
}

impl Perspective {
    const ALL: [Self; 5] = [
        Self::OtherPerson,
        Self::FutureSelf,
        Self::PastSelf,
        Self::InnerCritic,
        Self::CompassionateSelf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OtherPerson => "other-person",
            Self::FutureSelf => "future-self",
            Self::PastSelf => "past-self",
            Self::InnerCritic => "inner-critic",
            Self::CompassionateSelf => "compassionate-self",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s.trim())
    }

    /// How the chair's occupant is named in the exercise text.
    fn phrase(self) -> &'static str {
        match self {
            Self::OtherPerson => "the other person",
            Self::FutureSelf => "your future self",
            Self::PastSelf => "your past self",
            Self::InnerCritic => "your inner critic",
            Self::CompassionateSelf => "your compassionate self",
        }
    }
}

pub fn empty_chair_text(perspective: Perspective, prompt: &str) -> String {
    format!(
        "Let's begin the empty chair exercise. Imagine {} sitting across from you. {}\n\n\
         Take your time to express what you're feeling. I'll guide you through this dialogue.",
        perspective.phrase(),
        prompt.trim()
    )
}

pub fn role_play_text(scenario: &str, role: &str) -> String {
    format!(
        "I'll take on the role of {} in this scenario: {}\n\n\
         Let's begin the role-play. Feel free to respond as yourself, and I'll stay in \
         character to help you practice.",
        role.trim(),
        scenario.trim()
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Safety net
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static SELF_HARM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(suicid\w*|kill(ing)? myself|end(ing)? (it all|my life)|take my (own )?life|self[- ]?harm\w*|hurt(ing)? myself|cut(ting)? myself|want(ed)? to die|better off dead|(don'?t|do not) want to (live|be here|be alive))\b",
    )
    .unwrap()
});

/// Whether the text discloses self-harm or suicidal thoughts.
pub fn mentions_self_harm(text: &str) -> bool {
    SELF_HARM.is_match(text)
}
