//! ReAct agent loop (C10)
//!
//! The agent holds no memory of its own: each request is one or two chat
//! calls. Turn 1 asks the model to either answer directly or emit exactly
//! one typed action line:
//!
//! ```text
//! ACTION: SEARCH query="<text>" date="<filter-or-None>"
//! ```
//!
//! When the action line is present, the retriever runs and its envelope is
//! fed back as an observation; turn 2 must ground its answer strictly in
//! that envelope and acknowledge the no-record sentinel instead of
//! inventing memories. Retrieval failures become plain-text observations
//! with an instruction to apologize and stop.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::embedding::TextEmbedder;
use crate::llm::{ChatClient, ChatError, ChatMessage};
use crate::retriever::{render_envelope, Retriever, Snapshot, NO_RECORD_ENVELOPE};

/// Retrieval depth for agent-issued searches.
const AGENT_TOP_K: usize = 5;
/// How many recent turns the decision prompt summarizes.
const HISTORY_TURNS: usize = 6;
/// Per-turn char budget inside the history summary.
const HISTORY_TURN_CHARS: usize = 120;

/// The action line is matched against three regexes in priority order:
/// the full two-field form, the query-only form, and a permissive
/// fallback tolerating single quotes and missing `ACTION:`.
static ACTION_FULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)ACTION:\s*SEARCH\s+query="([^"]+)"\s+date="([^"]*)""#).expect("static regex")
});
static ACTION_QUERY_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)ACTION:\s*SEARCH\s+query="([^"]+)""#).expect("static regex")
});
static ACTION_LOOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)SEARCH\s+query=["']([^"']+)["'](?:\s+date=["']([^"']*)["'])?"#)
        .expect("static regex")
});

/// A parsed `SEARCH` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchAction {
    pub query: String,
    pub date: Option<String>,
}

/// Extract the first `SEARCH` action from a model reply, if any.
pub fn parse_action(text: &str) -> Option<SearchAction> {
    for regex in [&*ACTION_FULL, &*ACTION_QUERY_ONLY, &*ACTION_LOOSE] {
        if let Some(caps) = regex.captures(text) {
            let query = caps.get(1)?.as_str().trim().to_string();
            if query.is_empty() {
                continue;
            }
            let date = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("none") && !d.eq_ignore_ascii_case("null"));
            return Some(SearchAction { query, date });
        }
    }
    None
}

/// The final answer plus what the agent did to get it.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    /// The action taken, when turn 1 decided to retrieve
    pub action: Option<SearchAction>,
    /// The model hit its output budget; the answer carries an apology
    pub truncated: bool,
}

/// One-shot agent over a retrieval snapshot.
pub struct Agent<'a> {
    chat: &'a ChatClient,
    snapshot: &'a Snapshot,
    embedder: &'a dyn TextEmbedder,
}

impl<'a> Agent<'a> {
    pub fn new(chat: &'a ChatClient, snapshot: &'a Snapshot, embedder: &'a dyn TextEmbedder) -> Self {
        Self {
            chat,
            snapshot,
            embedder,
        }
    }

    /// Answer one user message, retrieving at most once.
    pub fn answer(
        &self,
        message: &str,
        history: &[ChatMessage],
        today: NaiveDate,
    ) -> Result<AgentOutcome, ChatError> {
        let _span = tracing::info_span!("agent_answer").entered();

        let mut messages = vec![ChatMessage::system(decision_prompt(today, history))];
        messages.push(ChatMessage::user(message));
        let decision = self.chat.complete(&messages, 0.2, 1024)?;

        let Some(action) = parse_action(&decision.content) else {
            tracing::debug!("No action emitted, turn-1 text is the answer");
            let truncated = decision.truncated();
            return Ok(finish(decision.content, None, truncated));
        };
        tracing::info!(query = %action.query, date = ?action.date, "Agent issued SEARCH");

        let retriever = Retriever::new(self.snapshot, self.embedder);
        let observation =
            match retriever.search(&action.query, action.date.as_deref(), AGENT_TOP_K, today) {
                Ok(hits) => render_envelope(&hits),
                Err(e) => {
                    tracing::warn!(error = %e, "Retrieval failed, surfacing to the model");
                    format!("检索失败，无法访问记忆库：{}", e)
                }
            };

        let grounded = vec![
            ChatMessage::system(grounding_prompt(today)),
            ChatMessage::user(message),
            ChatMessage::assistant(decision.content),
            ChatMessage::user(format!("观察（检索结果）：\n{}", observation)),
        ];
        let response = self.chat.complete(&grounded, 0.2, 1024)?;
        let truncated = response.truncated();
        Ok(finish(response.content, Some(action), truncated))
    }
}

fn finish(answer: String, action: Option<SearchAction>, truncated: bool) -> AgentOutcome {
    let answer = if truncated {
        format!("{}\n\n（抱歉，回答因长度限制被截断，以上内容可能不完整。）", answer)
    } else {
        answer
    };
    AgentOutcome {
        answer,
        action,
        truncated,
    }
}

/// Turn-1 system prompt: the current date, the action grammar, and a short
/// summary of recent turns for pronoun resolution.
fn decision_prompt(today: NaiveDate, history: &[ChatMessage]) -> String {
    let mut prompt = format!(
        "你是一个私人记忆助手，可以检索用户的语音日记。今天的日期是 {today}。\n\
         \n\
         如果用户的问题需要查找过往记录，只输出一行、不要输出其他内容：\n\
         ACTION: SEARCH query=\"<检索词>\" date=\"<日期过滤或None>\"\n\
         \n\
         日期过滤支持：YYYY-MM-DD、YYYY-MM、YYYY、YYYY-MM-上旬/中旬/下旬、\
         today、yesterday、last_week、last_month、last_year、N_days_ago、N_months_ago。\
         不确定日期时用 date=\"None\"。\n\
         如果问题不需要查记录（比如打招呼或常识问题），直接用中文回答。",
        today = today.format("%Y-%m-%d"),
    );
    let summary = history_summary(history);
    if !summary.is_empty() {
        prompt.push_str("\n\n最近的对话（用于理解代词指代）：\n");
        prompt.push_str(&summary);
    }
    prompt
}

/// Turn-2 system prompt: ground strictly in the observation.
fn grounding_prompt(today: NaiveDate) -> String {
    format!(
        "你是一个私人记忆助手。今天的日期是 {today}。\n\
         下面的\"观察\"是从用户日记中检索到的全部内容。回答必须严格基于观察：\n\
         - 只引用观察中出现的事实，不要编造任何名字、日期或事件。\n\
         - 如果观察是 {sentinel}，或与问题无关，明确告诉用户没有找到相关记录（no record found），\
           并建议换一种问法。\n\
         - 如果观察是检索失败的报错，向用户道歉并说明暂时无法访问记忆库，不要猜测答案。",
        today = today.format("%Y-%m-%d"),
        sentinel = NO_RECORD_ENVELOPE,
    )
}

/// Compress the last few turns into "用户:/助手:" lines.
fn history_summary(history: &[ChatMessage]) -> String {
    let recent = history.iter().rev().take(HISTORY_TURNS).collect::<Vec<_>>();
    recent
        .into_iter()
        .rev()
        .map(|m| {
            let who = match m.role.as_str() {
                "user" => "用户",
                _ => "助手",
            };
            let text: String = m.content.chars().take(HISTORY_TURN_CHARS).collect();
            format!("{}: {}", who, text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
