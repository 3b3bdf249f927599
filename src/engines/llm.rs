use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Confidence, MatchSource, Method, Prediction, Scorer, SourceMode};
use crate::error::{LedgerError, Result};
use crate::reference::{group_by_supplier, Query, ReferenceEntry};

/// Sends one system + user message pair to a chat model and returns the
/// reply text.
pub trait ChatClient {
    fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub const NO_MATCH: &str = "no_match";

const SYSTEM_PROMPT: &str = "You match bank transactions to known suppliers. \
You are given supplier profiles built from transactions already assigned to each supplier, \
and a list of unmatched transactions. Use the example descriptions, frequent tokens, prefixes, \
number patterns and reference codes in each profile. Only answer with supplier names that \
appear in the profiles.";

const USER_PROMPT: &str = r#"
**Supplier profiles (JSON):**
```json
{PROFILES_JSON}
```

**Unmatched transactions (JSON):**
```json
{TRANSACTIONS_JSON}
```

**Instructions:**

1.  For every unmatched transaction pick the single best supplier from the profiles.
2.  If no supplier fits, use "no_match" as the supplier name.
3.  Give a confidence level between 0 and 100.

**Output (JSON Array)** with one object per transaction:
[{"transaction_id": 123, "best_match_supplier_name": "Supplier", "confidence_level": 85}]
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplierProfile {
    pub supplier_name: String,
    pub examples: Vec<String>,
    pub identifying_tokens: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub number_patterns: Vec<String>,
    pub special_patterns: Vec<String>,
}

/// Condensed view of each supplier's known transactions, richest suppliers
/// first, at most `max_profiles` of them.
pub fn build_profiles(corpus: &[ReferenceEntry], max_profiles: usize) -> Result<Vec<SupplierProfile>> {
    let numbers = Regex::new(r"\d+")?;
    let codes = Regex::new(r"[A-Z0-9]{3,}[-\s][A-Z0-9]{3,}")?;

    let mut profiles = Vec::new();
    for (_, members) in group_by_supplier(corpus) {
        let Some(first) = members.first() else {
            continue;
        };
        let examples: Vec<String> = unique(members.iter().map(|m| m.original_description.clone()));

        let mut token_counts: Vec<(String, usize)> = Vec::new();
        for example in &examples {
            for token in example.to_lowercase().split_whitespace() {
                match token_counts.iter_mut().find(|(t, _)| t.as_str() == token) {
                    Some((_, n)) => *n += 1,
                    None => token_counts.push((token.to_string(), 1)),
                }
            }
        }
        token_counts.sort_by(|a, b| b.1.cmp(&a.1));

        let prefixes = unique(examples.iter().filter(|e| e.chars().count() > 3).map(|e| {
            e.chars().take(4).collect::<String>().to_lowercase()
        }));
        let number_runs = unique(
            examples
                .iter()
                .flat_map(|e| numbers.find_iter(e).map(|m| m.as_str().to_string())),
        );
        let special = unique(
            examples
                .iter()
                .flat_map(|e| codes.find_iter(e).map(|m| m.as_str().to_string())),
        );

        profiles.push(SupplierProfile {
            supplier_name: first.supplier_name.clone(),
            identifying_tokens: token_counts.into_iter().take(5).map(|(t, _)| t).collect(),
            common_prefixes: prefixes.into_iter().take(3).collect(),
            number_patterns: number_runs.into_iter().take(3).collect(),
            special_patterns: special.into_iter().take(3).collect(),
            examples: examples.into_iter().take(5).collect(),
        });
    }
    profiles.sort_by(|a, b| b.examples.len().cmp(&a.examples.len()));
    profiles.truncate(max_profiles);
    Ok(profiles)
}

fn unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|i| seen.insert(i.clone())).collect()
}

/// Rough token count: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

#[derive(Serialize)]
struct PromptTransaction<'a> {
    id: i64,
    description: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    posting_descriptions: Vec<&'a str>,
}

#[derive(Debug)]
struct PromptBatch {
    transaction_ids: Vec<i64>,
    user_prompt: String,
    tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Verdict {
    pub transaction_id: Value,
    pub best_match_supplier_name: String,
    #[serde(default)]
    pub confidence_level: Value,
}

impl Verdict {
    fn transaction_id(&self) -> Option<i64> {
        match &self.transaction_id {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn confidence(&self) -> u8 {
        let raw = match &self.confidence_level {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
            _ => 0.0,
        };
        raw.round().clamp(0.0, 100.0) as u8
    }
}

/// Pull the JSON array out of a chat reply: everything between the first
/// `[` and the last `]`.
pub fn parse_reply(text: &str) -> Result<Vec<Verdict>> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(LedgerError::Other("no JSON array in model reply".to_string()));
    };
    if end < start {
        return Err(LedgerError::Other("no JSON array in model reply".to_string()));
    }
    Ok(serde_json::from_str(&text[start..=end])?)
}

pub struct LlmEngine<C: ChatClient> {
    client: C,
    batch_size: usize,
    max_prompt_tokens: usize,
    max_profiles: usize,
    sources: SourceMode,
}

impl<C: ChatClient> LlmEngine<C> {
    pub fn new(client: C, sources: SourceMode) -> Self {
        Self {
            client,
            batch_size: 150,
            max_prompt_tokens: 100_000,
            max_profiles: 100,
            sources,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_prompt_budget(mut self, max_prompt_tokens: usize) -> Self {
        self.max_prompt_tokens = max_prompt_tokens;
        self
    }

    pub fn with_max_profiles(mut self, max_profiles: usize) -> Self {
        self.max_profiles = max_profiles.max(1);
        self
    }

    fn budget(&self) -> usize {
        self.max_prompt_tokens * 8 / 10
    }

    fn user_prompt(&self, profiles_json: &str, queries: &[Query]) -> Result<String> {
        let transactions: Vec<PromptTransaction> = queries
            .iter()
            .map(|q| PromptTransaction {
                id: q.transaction_id,
                description: &q.original_description,
                posting_descriptions: match self.sources {
                    SourceMode::MainOnly => Vec::new(),
                    _ => q.aux_descriptions.iter().map(String::as_str).collect(),
                },
            })
            .collect();
        Ok(USER_PROMPT
            .replace("{PROFILES_JSON}", profiles_json)
            .replace("{TRANSACTIONS_JSON}", &serde_json::to_string_pretty(&transactions)?))
    }

    /// Split queries into prompts that fit the budget. When a batch is too
    /// large the batch size shrinks in proportion and planning restarts.
    fn plan_batches(&self, profiles_json: &str, queries: &[Query]) -> Result<Vec<PromptBatch>> {
        let budget = self.budget();
        let system_tokens = estimate_tokens(SYSTEM_PROMPT);
        let mut size = self.batch_size;
        'plan: loop {
            let mut batches = Vec::new();
            for chunk in queries.chunks(size) {
                let user_prompt = self.user_prompt(profiles_json, chunk)?;
                let tokens = system_tokens + estimate_tokens(&user_prompt);
                if tokens > budget && chunk.len() > 1 {
                    let shrunk = (chunk.len() * budget / tokens).max(1);
                    size = shrunk.min(chunk.len() - 1);
                    tracing::debug!("prompt of {tokens} tokens over budget, batch size now {size}");
                    continue 'plan;
                }
                batches.push(PromptBatch {
                    transaction_ids: chunk.iter().map(|q| q.transaction_id).collect(),
                    user_prompt,
                    tokens,
                });
            }
            return Ok(batches);
        }
    }
}

impl<C: ChatClient> Scorer for LlmEngine<C> {
    fn method(&self) -> Method {
        Method::Llm
    }

    fn score_all(&mut self, queries: &[Query], corpus: &[ReferenceEntry]) -> Result<Vec<Prediction>> {
        if corpus.is_empty() || queries.is_empty() {
            return Ok(Vec::new());
        }
        let profiles = build_profiles(corpus, self.max_profiles)?;
        let profiles_json = serde_json::to_string_pretty(&profiles)?;

        // Supplier name -> first reference entry of that supplier.
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (index, entry) in corpus.iter().enumerate() {
            by_name.entry(entry.supplier_name.to_lowercase()).or_insert(index);
        }

        let budget = self.budget();
        let mut predictions = Vec::new();
        for (n, batch) in self.plan_batches(&profiles_json, queries)?.into_iter().enumerate() {
            if batch.tokens > budget {
                tracing::warn!(
                    "skipping batch {} ({} tokens over the {budget} budget)",
                    n + 1,
                    batch.tokens
                );
                continue;
            }
            tracing::info!(
                "asking model about {} transactions (batch {}, ~{} tokens)",
                batch.transaction_ids.len(),
                n + 1,
                batch.tokens
            );
            let reply = match self.client.complete(SYSTEM_PROMPT, &batch.user_prompt) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("batch {} failed: {e}", n + 1);
                    continue;
                }
            };
            let verdicts = match parse_reply(&reply) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("batch {}: unreadable reply ({e})", n + 1);
                    continue;
                }
            };

            let mut answered: HashSet<i64> = HashSet::new();
            for verdict in verdicts {
                let Some(tx) = verdict.transaction_id() else {
                    continue;
                };
                if !batch.transaction_ids.contains(&tx) || !answered.insert(tx) {
                    continue;
                }
                let name = verdict.best_match_supplier_name.trim();
                if name.eq_ignore_ascii_case(NO_MATCH) {
                    continue;
                }
                let Some(&index) = by_name.get(&name.to_lowercase()) else {
                    tracing::debug!("transaction {tx}: model named unknown supplier '{name}'");
                    continue;
                };
                let entry = &corpus[index];
                predictions.push(Prediction {
                    transaction_id: tx,
                    reference_index: index,
                    supplier_id: entry.supplier_id,
                    supplier_name: entry.supplier_name.clone(),
                    confidence: Confidence::Percent(verdict.confidence()),
                    source: MatchSource::Main,
                });
            }
        }
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::engines::test_support::{corpus, query, reference};

    struct ScriptedChat {
        replies: RefCell<Vec<String>>,
        prompts: RefCell<Vec<String>>,
    }

    impl ScriptedChat {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: RefCell::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChatClient for ScriptedChat {
        fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.borrow_mut().push(user.to_string());
            self.replies
                .borrow_mut()
                .pop()
                .ok_or_else(|| LedgerError::Other("no scripted reply".to_string()))
        }
    }

    #[test]
    fn test_profiles() {
        let c = vec![
            reference(1, 10, "Telenor", "TELENOR NORGE AS 123456"),
            reference(2, 10, "Telenor", "TELENOR NORGE AS 654321"),
            reference(3, 10, "Telenor", "TELENOR NORGE AS 123456"),
            reference(4, 20, "Aviant", "Aviant KID-99812"),
        ];
        let profiles = build_profiles(&c, 100).unwrap();
        assert_eq!(profiles.len(), 2);
        let telenor = &profiles[0];
        assert_eq!(telenor.supplier_name, "Telenor");
        assert_eq!(telenor.examples.len(), 2);
        assert_eq!(telenor.identifying_tokens[..3], ["telenor", "norge", "as"]);
        assert_eq!(telenor.common_prefixes, vec!["tele"]);
        assert_eq!(telenor.number_patterns, vec!["123456", "654321"]);
        assert_eq!(profiles[1].special_patterns, vec!["KID-99812"]);

        assert_eq!(build_profiles(&c, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_reply_with_prose_around() {
        let reply = "Sure! Here you go:\n```json\n[{\"transaction_id\": 7, \
            \"best_match_supplier_name\": \"Netflix\", \"confidence_level\": 92}]\n```";
        let verdicts = parse_reply(reply).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].transaction_id(), Some(7));
        assert_eq!(verdicts[0].confidence(), 92);
        assert!(parse_reply("I cannot help with that").is_err());
        assert!(parse_reply("] oops [").is_err());
    }

    #[test]
    fn test_verdict_tolerates_strings() {
        let verdicts = parse_reply(
            r#"[{"transaction_id": "12", "best_match_supplier_name": "X", "confidence_level": "140%"}]"#,
        )
        .unwrap();
        assert_eq!(verdicts[0].transaction_id(), Some(12));
        assert_eq!(verdicts[0].confidence(), 100);
    }

    #[test]
    fn test_predictions_stay_inside_reference_set() {
        let c = corpus();
        let chat = ScriptedChat::new(&[r#"[
            {"transaction_id": 100, "best_match_supplier_name": "netflix", "confidence_level": 90},
            {"transaction_id": 101, "best_match_supplier_name": "Made Up AS", "confidence_level": 99},
            {"transaction_id": 102, "best_match_supplier_name": "no_match", "confidence_level": 0},
            {"transaction_id": 555, "best_match_supplier_name": "Spotify", "confidence_level": 80}
        ]"#]);
        let mut engine = LlmEngine::new(chat, SourceMode::BestOf);
        let predictions = engine
            .score_all(
                &[query(100, "NETFLIX.COM"), query(101, "???"), query(102, "zzz")],
                &c,
            )
            .unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].transaction_id, 100);
        assert_eq!(predictions[0].supplier_name, "Netflix");
        assert_eq!(predictions[0].confidence, Confidence::Percent(90));
    }

    #[test]
    fn test_batches_split_and_failed_batch_skipped() {
        let c = corpus();
        let chat = ScriptedChat::new(&["not json at all", r#"[{"transaction_id": 3,
            "best_match_supplier_name": "Spotify", "confidence_level": 75}]"#]);
        let mut engine = LlmEngine::new(chat, SourceMode::MainOnly).with_batch_size(2);
        let queries = vec![query(1, "a"), query(2, "b"), query(3, "spotify")];
        let predictions = engine.score_all(&queries, &c).unwrap();
        assert_eq!(engine.client.prompts.borrow().len(), 2);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].supplier_name, "Spotify");
    }

    #[test]
    fn test_plan_shrinks_batches_to_budget() {
        let c = corpus();
        let profiles_json = serde_json::to_string_pretty(&build_profiles(&c, 100).unwrap()).unwrap();
        let engine = LlmEngine::new(ScriptedChat::new(&[]), SourceMode::MainOnly);
        let queries: Vec<Query> = (0..40)
            .map(|i| query(i, &format!("SOME FAIRLY LONG TRANSACTION DESCRIPTION NUMBER {i}")))
            .collect();
        let ten = engine.user_prompt(&profiles_json, &queries[..10]).unwrap();
        let budget_tokens = estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&ten);
        let engine = engine.with_prompt_budget(budget_tokens * 10 / 8 + 2);

        let batches = engine.plan_batches(&profiles_json, &queries).unwrap();
        assert!(batches.len() > 1);
        assert!(batches.iter().all(|b| b.tokens <= engine.budget()));
        let total: usize = batches.iter().map(|b| b.transaction_ids.len()).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_posting_descriptions_in_prompt() {
        let engine = LlmEngine::new(ScriptedChat::new(&[]), SourceMode::BestOf);
        let mut q = query(1, "AVTALEGIRO");
        q.aux_descriptions = vec!["telenor mobil".to_string()];
        let prompt = engine.user_prompt("[]", &[q.clone()]).unwrap();
        assert!(prompt.contains("telenor mobil"));

        let engine = LlmEngine::new(ScriptedChat::new(&[]), SourceMode::MainOnly);
        let prompt = engine.user_prompt("[]", &[q]).unwrap();
        assert!(!prompt.contains("telenor mobil"));
    }
}
