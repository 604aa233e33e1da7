//! Prompt templates for every LLM-backed operation.
//!
//! Templates are raw string constants with `{placeholder}` slots filled by
//! `str::replace`. Keeping them in one place makes the model-facing surface
//! reviewable at a glance.

const PLAN_PROMPT: &str = r#"You are a research planning assistant. Create a detailed, step-by-step research plan for the topic: "{topic}"

Available tools for research:
{available_tools}

The plan should include 5-7 actionable steps covering:
1. Initial research and definition gathering
2. Deep dive into specific subtopics
3. Analysis of methods/approaches
4. Evaluation of benchmarks/datasets (if applicable)
5. Identification of challenges and gaps
6. Synthesis and report writing

For each step:
- Provide specific search queries
- Select the most appropriate tool from the available list
- Include tool_args with the required parameters

Return ONLY a JSON object:
{
    "topic": "{topic}",
    "summary": "<Brief 1-2 sentence summary of the research plan>",
    "steps": [
        {
            "id": 1,
            "action": "research",
            "title": "<Short title>",
            "description": "<What this step accomplishes>",
            "queries": ["query1", "query2"],
            "tool": "<tool_name from available tools>",
            "tool_args": {"query": "...", "max_results": 20}
        }
    ]
}"#;

pub fn plan_prompt(topic: &str, available_tools: &str, hints: &str) -> String {
    let mut prompt = PLAN_PROMPT
        .replace("{topic}", topic)
        .replace("{available_tools}", available_tools);
    if !hints.is_empty() {
        prompt.push_str("\n\nUser has provided the following hints:\n");
        prompt.push_str(hints);
    }
    prompt
}

const RELEVANCE_BATCH_PROMPT: &str = r#"Analyze the relevance of these papers to the research topic: "{topic}"

{papers}

Return a JSON array with one object per paper:
[
    {"paper_index": 0, "score": 8.5, "reasoning": "Directly addresses..."},
    {"paper_index": 1, "score": 3.0, "reasoning": "Tangentially related..."}
]

Score meanings:
- 9-10: Core paper, directly addresses the topic
- 7-8: Highly relevant, provides important context
- 5-6: Moderately relevant, some useful information
- 3-4: Tangentially related
- 0-2: Not relevant"#;

pub fn relevance_batch_prompt(topic: &str, papers: &str) -> String {
    RELEVANCE_BATCH_PROMPT
        .replace("{topic}", topic)
        .replace("{papers}", papers)
}

const SCREENING_BATCH_PROMPT: &str = r#"You are screening papers for a systematic literature review on: "{topic}"

For each paper decide a tier:
- core: directly addresses the topic, should anchor the review
- background: related context worth keeping
- exclude: off-topic or unusable

{papers}

Return ONLY a JSON array, one object per paper:
[
    {"paper_index": 0, "tier": "core", "reason_code": "on_topic", "rationale_short": "<one sentence>", "scored_relevance": 8.5}
]

reason_code is a short snake_case tag (on_topic, related_method, off_topic, no_abstract, survey_only).
scored_relevance is 0-10."#;

pub fn screening_batch_prompt(topic: &str, papers: &str) -> String {
    SCREENING_BATCH_PROMPT
        .replace("{topic}", topic)
        .replace("{papers}", papers)
}

const EVIDENCE_EXTRACTION_PROMPT: &str = r#"Extract a structured study card from this paper. Every field you populate MUST carry a verbatim snippet copied character-for-character from the provided content. Do not paraphrase snippets. Skip fields the content does not support.

Title: {title}

Content:
{content}

Return ONLY a JSON object:
{
    "problem": {"text": "<summary>", "snippet": "<verbatim quote>", "confidence": 0.9},
    "method": {"text": "<summary>", "snippet": "<verbatim quote>", "confidence": 0.9},
    "datasets": [{"name": "<dataset>", "snippet": "<verbatim quote>", "confidence": 0.8}],
    "metrics": [{"name": "<metric>", "snippet": "<verbatim quote>", "confidence": 0.8}],
    "results": [{"text": "<finding>", "snippet": "<verbatim quote>", "confidence": 0.8}],
    "limitations": [{"text": "<limitation>", "snippet": "<verbatim quote>", "confidence": 0.7}]
}"#;

pub fn evidence_extraction_prompt(title: &str, content: &str) -> String {
    EVIDENCE_EXTRACTION_PROMPT
        .replace("{title}", title)
        .replace("{content}", content)
}

const CLUSTER_LABEL_PROMPT: &str = r#"Group the following research papers into a single research theme/direction.

Papers:
{titles}

Return ONLY a JSON object:
{
    "name": "<Short Theme Name>",
    "description": "<Brief description of this research direction>"
}"#;

pub fn cluster_label_prompt(titles: &str) -> String {
    CLUSTER_LABEL_PROMPT.replace("{titles}", titles)
}

const CLAIM_GENERATION_PROMPT: &str = r#"You are writing atomic, citable claims for the research theme "{theme}".

Study cards (structured extractions, one per paper):
{study_cards}

Evidence spans (each has a span_id you may cite):
{evidence_spans}

Write 3-8 atomic claims about this theme. Each claim:
- states ONE factual finding supported by the evidence spans
- cites the span_ids that support it (only ids listed above)
- gets a salience_score in [0,1] for how central it is to the theme
- sets uncertainty_flag true when the evidence is thin or conflicting

Return ONLY a JSON array:
[
    {"claim_text": "<one sentence>", "evidence_span_ids": ["<id>"], "salience_score": 0.8, "uncertainty_flag": false}
]"#;

pub fn claim_generation_prompt(theme: &str, study_cards: &str, evidence_spans: &str) -> String {
    CLAIM_GENERATION_PROMPT
        .replace("{theme}", theme)
        .replace("{study_cards}", study_cards)
        .replace("{evidence_spans}", evidence_spans)
}

const CITATION_AUDIT_PROMPT: &str = r#"Does the evidence semantically support the claim?

Claim: {claim}

Evidence:
{evidence}

Judge strictly: the claim must follow from the quoted snippets, not from general knowledge.

Return ONLY a JSON object:
{
    "supported": true,
    "severity": "minor"
}

severity is only read when supported is false: "minor" means the claim overstates slightly, "major" means the evidence does not back it."#;

pub fn citation_audit_prompt(claim: &str, evidence: &str) -> String {
    CITATION_AUDIT_PROMPT
        .replace("{claim}", claim)
        .replace("{evidence}", evidence)
}

const CLAIM_REWRITE_PROMPT: &str = r#"The following claim is not well-supported by the evidence. Rewrite it more conservatively to match what the evidence actually says.

Original claim: {claim}

Available evidence:
{evidence}

Return ONLY the rewritten claim text (1-3 sentences). If the evidence is insufficient, prefix with 'Evidence suggests that'."#;

pub fn claim_rewrite_prompt(claim: &str, evidence: &str) -> String {
    CLAIM_REWRITE_PROMPT
        .replace("{claim}", claim)
        .replace("{evidence}", evidence)
}

const GAP_MINING_PROMPT: &str = r#"You are identifying research gaps for the topic "{topic}".

Limitations reported across papers (each with the span_id that grounds it):
{limitations}

Coverage so far:
- Themes: {themes}
- Datasets: {datasets}
- Metrics: {metrics}
- Method families: {method_families}

Unexplored (theme, dataset, metric) combinations:
{taxonomy_holes}

Papers reporting on the same dataset/metric pairs (candidate contradictions):
{contradictions}

Propose 3-6 future research directions. Ground each in limitation span_ids where possible.

Return ONLY a JSON array:
[
    {
        "direction_type": "open_problem",
        "title": "<short title>",
        "description": "<2-3 sentences>",
        "evidence_span_ids": ["<span_id>"],
        "gap_source": "limitation_cluster"
    }
]

direction_type is one of: open_problem, research_opportunity, next_experiment.
gap_source is one of: limitation_cluster, contradictory_results, taxonomy_hole."#;

#[allow(clippy::too_many_arguments)]
pub fn gap_mining_prompt(
    topic: &str,
    limitations: &str,
    themes: &str,
    datasets: &str,
    metrics: &str,
    method_families: &str,
    taxonomy_holes: &str,
    contradictions: &str,
) -> String {
    GAP_MINING_PROMPT
        .replace("{topic}", topic)
        .replace("{limitations}", limitations)
        .replace("{themes}", themes)
        .replace("{datasets}", datasets)
        .replace("{metrics}", metrics)
        .replace("{method_families}", method_families)
        .replace("{taxonomy_holes}", taxonomy_holes)
        .replace("{contradictions}", contradictions)
}

const THEME_SYNTHESIS_PROMPT: &str = r#"Write a coherent synthesis paragraph (or two) for the research theme "{theme}".

Grounded claims (cite papers inline as Author (Year) where given):
{claims}

Papers behind the claims:
{papers}

Rules:
- Use ONLY the claims above; do not add outside knowledge
- Weave claims into flowing prose, grouped by finding
- Mark uncertain claims with hedged language ("evidence suggests")
- Return plain Markdown prose, no headers"#;

pub fn theme_synthesis_prompt(theme: &str, claims: &str, papers: &str) -> String {
    THEME_SYNTHESIS_PROMPT
        .replace("{theme}", theme)
        .replace("{claims}", claims)
        .replace("{papers}", papers)
}

const QUERY_REFINE_PROMPT: &str = r#"You are an academic search query optimizer. A user searched for academic papers but got poor results.

Original query: "{query}"
Results found: {num_results} (too few or irrelevant)
Already tried: {tried}

Analyze why this query might fail and suggest 2-3 DIFFERENT search queries that would find relevant academic papers.

Common issues:
- Product/model names that don't match paper titles
- Too specific terms that narrow results too much
- Informal language that doesn't match academic writing style
- Missing key academic terms or synonyms

Rules:
- Each query should be in English (academic papers are mostly in English)
- Use academic/technical terminology
- Each query should take a different angle (broader, narrower, synonyms)
- Do NOT repeat any already-tried queries
- Keep queries concise (2-6 words each)

Return ONLY a JSON array of query strings, nothing else:
["query1", "query2", "query3"]"#;

pub fn query_refine_prompt(query: &str, num_results: usize, tried: &str) -> String {
    QUERY_REFINE_PROMPT
        .replace("{query}", query)
        .replace("{num_results}", &num_results.to_string())
        .replace("{tried}", tried)
}

const CLARIFY_PROMPT: &str = r#"You are a friendly research assistant having a natural conversation with a user.

User's query: "{query}"

The user is speaking in {language}. You MUST respond in {language} in a natural, conversational way.

Think like a researcher:
1. What is the user really trying to achieve?
2. Is anything unclear or ambiguous?
3. What clarifying questions would help?

Respond in this format (all text in {language}):
UNDERSTANDING: [Your interpretation in 1 sentence - natural tone, not robotic]
SUBQUERIES: [If compound, list sub-objectives separated by |, otherwise "none"]
QUESTIONS: [1-2 clarifying questions separated by |, or "none" if query is clear - ask naturally like a colleague]

Important tone guidelines:
- Be conversational and friendly, not formal or robotic
- Don't use templates like "I understand that..." - just state your understanding naturally
- Ask questions conversationally, not in a checklist format"#;

pub fn clarify_prompt(query: &str, language: &str) -> String {
    CLARIFY_PROMPT
        .replace("{query}", query)
        .replace("{language}", language)
}

const INTENT_PROMPT: &str = r#"Classify user intent. Choose ONE:
- confirm: User agrees, approves, or wants to proceed
- cancel: User rejects, stops, or wants to abort
- edit: User wants to modify or change something
- new_topic: User provides a NEW RESEARCH TOPIC to investigate (must be an academic/scientific topic)
- chat: User is making casual conversation, greeting, asking about you, asking for help, or saying something NOT related to academic research
- other: Unclear
{context}
Message: "{message}"

IMPORTANT: Only classify as "new_topic" if the message is clearly a research/academic topic the user wants to investigate. Greetings, questions about the assistant, small talk, and general questions should be "chat".

Reply with just the intent word (confirm/cancel/edit/new_topic/chat/other):"#;

pub fn intent_prompt(message: &str, context: &str) -> String {
    let context_hint = if context.is_empty() {
        String::new()
    } else {
        format!("\nContext: {context}")
    };
    INTENT_PROMPT
        .replace("{context}", &context_hint)
        .replace("{message}", message)
}

const CHAT_PROMPT: &str = r#"You are a friendly research assistant. The user is chatting casually with you.

User's message: "{message}"

Respond naturally and conversationally in {language}. Keep it brief (1-3 sentences).

Guidelines:
- If they greet you, greet back warmly and ask what topic they'd like to research
- If they ask what you can do, briefly explain: you help find and analyze academic papers on any topic
- If they thank you, respond naturally
- If it's unclear, gently guide them to tell you a research topic
- ALWAYS respond in {language}"#;

pub fn chat_prompt(message: &str, language: &str) -> String {
    CHAT_PROMPT
        .replace("{message}", message)
        .replace("{language}", language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_filled() {
        let prompt = plan_prompt("graph neural networks", "  - search(query)", "");
        assert!(prompt.contains("graph neural networks"));
        assert!(!prompt.contains("{topic}"));
        assert!(!prompt.contains("{available_tools}"));

        let prompt = intent_prompt("ok", "User was shown a plan");
        assert!(prompt.contains("Context: User was shown a plan"));

        let prompt = intent_prompt("ok", "");
        assert!(!prompt.contains("Context:"));
    }
}
