//! Multilingual intent detection: keyword matching first, LLM fallback with
//! a state-aware context hint. URLs are always extracted from the raw
//! message regardless of intent.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::llm::{GenerateRequest, LlmClient};
use crate::planner::query_parser::extract_urls;
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIntent {
    Confirm,
    Cancel,
    Edit,
    NewTopic,
    Chat,
    Other,
}

#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: UserIntent,
    pub confidence: f64,
    /// For EDIT, the modification request text.
    pub edit_text: String,
    pub original_message: String,
    pub extracted_urls: Vec<String>,
}

const CONFIRM_KEYWORDS: &[&str] = &[
    // English
    "yes", "yeah", "yep", "ok", "okay", "sure", "proceed", "go", "approved", "approve", "confirm",
    "start", "begin", "run", "execute", "good", "fine", "great", "perfect", "lgtm", "alright",
    "right", "absolutely", "definitely", "certainly", "affirmative", "y",
    // Vietnamese
    "có", "được", "chạy",
    // Chinese
    "好", "好的", "可以", "行", "确认", "开始",
];

const CONFIRM_PHRASES: &[&str] = &[
    "do it", "let's go", "let's do it", "go ahead", "go for it", "sounds good", "looks good",
    "that works", "make it so", "ship it", "let's start", "let's begin", "i agree", "i approve",
    "that's fine", "thats fine",
    // Vietnamese
    "đồng ý", "tiếp tục", "bắt đầu", "thực hiện",
];

const CANCEL_KEYWORDS: &[&str] = &[
    // English
    "no", "nope", "nah", "cancel", "stop", "abort", "quit", "exit", "nevermind", "forget",
    "don't", "reject",
    // Vietnamese
    "không", "hủy", "dừng", "thôi", "bỏ",
    // Chinese
    "不", "不要", "取消", "停止",
];

const EDIT_KEYWORDS: &[&str] = &[
    "add", "remove", "delete", "change", "modify", "update",
    // Vietnamese
    "thêm", "xóa", "sửa", "đổi",
    // Chinese
    "添加", "删除", "修改",
];

const CHAT_KEYWORDS: &[&str] = &[
    // English greetings
    "hi", "hello", "hey", "howdy",
    // Vietnamese
    "chào", "xin",
    // Chinese
    "你好", "嗨",
];

const CHAT_PHRASES: &[&str] = &[
    // English
    "what is your name", "what's your name", "who are you", "what are you", "how are you",
    "what can you do", "help me", "thank you", "thanks", "good morning", "good afternoon",
    "good evening",
    // Vietnamese
    "tên là gì", "bạn là ai", "bạn tên gì", "bạn là gì", "giúp tôi", "cảm ơn", "cám ơn",
    "bạn có thể làm gì", "chào bạn", "xin chào",
    // Chinese
    "你叫什么", "你是谁", "谢谢",
];

pub struct IntentClassifier {
    llm: Option<Arc<dyn LlmClient>>,
}

impl IntentClassifier {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        IntentClassifier { llm }
    }

    /// Keyword-based classification. Fast, no LLM.
    pub fn classify(&self, message: &str) -> IntentResult {
        let extracted_urls = extract_urls(message);
        let clean = message.trim().to_lowercase();
        let words: HashSet<&str> = clean.split_whitespace().collect();

        let result = |intent, confidence, edit_text: &str| IntentResult {
            intent,
            confidence,
            edit_text: edit_text.to_string(),
            original_message: message.to_string(),
            extracted_urls: extracted_urls.clone(),
        };

        if CONFIRM_KEYWORDS.iter().any(|k| words.contains(k)) || CONFIRM_KEYWORDS.contains(&clean.as_str()) {
            return result(UserIntent::Confirm, 0.9, "");
        }
        if CONFIRM_PHRASES.iter().any(|phrase| clean.contains(phrase)) {
            return result(UserIntent::Confirm, 0.85, "");
        }
        if CANCEL_KEYWORDS.iter().any(|k| words.contains(k)) || CANCEL_KEYWORDS.contains(&clean.as_str()) {
            return result(UserIntent::Cancel, 0.9, "");
        }
        if EDIT_KEYWORDS.iter().any(|k| words.contains(k)) {
            return result(UserIntent::Edit, 0.8, message);
        }
        if CHAT_KEYWORDS.iter().any(|k| words.contains(k)) {
            return result(UserIntent::Chat, 0.85, "");
        }
        if CHAT_PHRASES.iter().any(|phrase| clean.contains(phrase)) {
            return result(UserIntent::Chat, 0.9, "");
        }

        // Long enough to be a topic.
        if clean.len() > 5 && words.len() >= 2 {
            return result(UserIntent::NewTopic, 0.7, "");
        }
        result(UserIntent::Other, 0.5, "")
    }

    /// LLM classification with a state context hint, keyword fallback on
    /// any failure.
    pub async fn classify_with_llm(&self, message: &str, context: &str) -> IntentResult {
        let Some(llm) = &self.llm else {
            return self.classify(message);
        };

        let prompt = prompts::intent_prompt(message, context);
        match llm.generate(GenerateRequest::new(prompt)).await {
            Ok(response) => {
                let word = response
                    .trim()
                    .to_lowercase()
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let intent = match word.as_str() {
                    "confirm" => UserIntent::Confirm,
                    "cancel" => UserIntent::Cancel,
                    "edit" => UserIntent::Edit,
                    "new_topic" => UserIntent::NewTopic,
                    "chat" => UserIntent::Chat,
                    _ => UserIntent::Other,
                };
                IntentResult {
                    intent,
                    confidence: 0.9,
                    edit_text: if intent == UserIntent::Edit {
                        message.to_string()
                    } else {
                        String::new()
                    },
                    original_message: message.to_string(),
                    extracted_urls: extract_urls(message),
                }
            }
            Err(error) => {
                warn!(%error, "llm intent classification failed, falling back");
                self.classify(message)
            }
        }
    }
}
