//! Item extraction: turns free-text order requests into (product, quantity) pairs
//!
//! Strategy, in order:
//! 1. Messages made only of menu codes (`1x2 3`) are resolved locally.
//! 2. The text-generation capability is asked for `{"items": [...]}` JSON,
//!    given the live menu, codes and synonym hints.
//! 3. If the reply is not that JSON, the first `{...}` span inside it is tried.
//! 4. If generation failed or produced nothing, a local pattern parser runs.
//!
//! Nothing here fails: an empty result means "couldn't understand".

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chowbot_core::models::{ChatMessage, Product};
use chowbot_core::TextGenerator;
use regex::Regex;
use serde::Deserialize;

static CODE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:[x×*](\d+))?$").expect("valid regex"));

static FRAGMENT_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:,|;|\n|&|\+|\band\b)\s*").expect("valid regex"));

static QTY_THEN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*[x×*]?\s*([a-z][a-z' -]*)").expect("valid regex")
});

static NAME_THEN_QTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z][a-z' -]*?)\s*[x×*]?\s*(\d+)\s*$").expect("valid regex")
});

static ARTICLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:a|an|one)\s+([a-z][a-z' -]*)").expect("valid regex"));

const STOPWORDS: &[&str] = &[
    "and", "the", "with", "want", "like", "please", "some", "give", "get", "for", "would",
    "order", "need", "can", "have", "plate", "plates", "portion", "portions", "bottle", "of",
];

/// A candidate pulled out of the user's text. The name may be empty and the
/// quantity may be non-positive; the order flow discards such candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedItem {
    pub product: String,
    pub quantity: i64,
}

impl ExtractedItem {
    fn new(product: impl Into<String>, quantity: i64) -> Self {
        Self {
            product: product.into(),
            quantity,
        }
    }
}

/// Products shown on the menu, in code order (code = index + 1).
pub fn menu_entries(products: &[Product]) -> Vec<&Product> {
    products.iter().filter(|p| p.is_available).collect()
}

#[derive(Clone)]
pub struct ItemExtractor {
    generator: Arc<dyn TextGenerator>,
    synonyms: HashMap<String, String>,
    temperature: f32,
}

impl ItemExtractor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        synonyms: HashMap<String, String>,
        temperature: f32,
    ) -> Self {
        let synonyms = synonyms
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        Self {
            generator,
            synonyms,
            temperature,
        }
    }

    pub async fn extract(&self, text: &str, catalog: &[Product]) -> Vec<ExtractedItem> {
        let menu = menu_entries(catalog);

        if let Some(items) = parse_menu_codes(text, &menu) {
            tracing::debug!(count = items.len(), "Resolved order from menu codes");
            return items;
        }

        let prompt = self.build_prompt(text, &menu);
        match self.generator.generate(&prompt, self.temperature).await {
            Ok(reply) => {
                let items = parse_reply(&reply);
                if !items.is_empty() {
                    return items;
                }
                tracing::debug!("Extraction reply had no items, using local parser");
            }
            Err(e) => {
                tracing::warn!(
                    generator = self.generator.name(),
                    error = %e,
                    "Item extraction call failed, using local parser"
                );
            }
        }

        parse_locally(text, &menu, &self.synonyms)
    }

    fn build_prompt(&self, text: &str, menu: &[&Product]) -> Vec<ChatMessage> {
        let mut instructions = String::from(
            "You extract food order items from customer messages.\nMenu (code. name):\n",
        );
        for (i, product) in menu.iter().enumerate() {
            instructions.push_str(&format!("{}. {}\n", i + 1, product.name));
        }

        if !self.synonyms.is_empty() {
            instructions.push_str("Shorthand the customer may use:\n");
            let mut hints: Vec<_> = self.synonyms.iter().collect();
            hints.sort();
            for (short, name) in hints {
                instructions.push_str(&format!("- \"{}\" means {}\n", short, name));
            }
        }

        instructions.push_str(
            "Customers may refer to items by their code number. Always answer with the exact menu name.\n\
             Respond only with valid JSON in the form {\"items\": [{\"product\": \"<menu name>\", \"quantity\": 1}]}. \
             Use an empty list when nothing matches.",
        );

        vec![ChatMessage::system(instructions), ChatMessage::user(text)]
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    quantity: Option<serde_json::Value>,
}

fn quantity_of(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse `{"items": [...]}`, falling back to the first embedded `{...}` span.
pub fn parse_reply(reply: &str) -> Vec<ExtractedItem> {
    let parsed = serde_json::from_str::<ExtractionReply>(reply.trim()).ok().or_else(|| {
        let start = reply.find('{')?;
        let end = reply.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<ExtractionReply>(&reply[start..=end]).ok()
    });

    parsed
        .map(|r| {
            r.items
                .into_iter()
                .map(|raw| {
                    ExtractedItem::new(
                        raw.product.unwrap_or_default().trim(),
                        quantity_of(raw.quantity.as_ref()),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Local parsing
// ============================================================================

/// `Some` only when every token is a menu code reference such as `3` or `1x2`.
pub fn parse_menu_codes(text: &str, menu: &[&Product]) -> Option<Vec<ExtractedItem>> {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut items = Vec::new();
    for token in tokens {
        let lowered = token.to_lowercase();
        let caps = CODE_TOKEN.captures(&lowered)?;
        let code: usize = caps[1].parse().ok()?;
        let quantity: i64 = match caps.get(2) {
            Some(q) => q.as_str().parse().ok()?,
            None => 1,
        };
        match code.checked_sub(1).and_then(|i| menu.get(i)) {
            Some(product) => items.push(ExtractedItem::new(product.name.clone(), quantity)),
            None => tracing::debug!(code, "Ignoring unknown menu code"),
        }
    }
    Some(items)
}

/// Pattern-based extraction over the raw text.
pub fn parse_locally(
    text: &str,
    menu: &[&Product],
    synonyms: &HashMap<String, String>,
) -> Vec<ExtractedItem> {
    let lowered = text.to_lowercase();
    let mut items = Vec::new();

    for fragment in FRAGMENT_SPLIT.split(&lowered) {
        let fragment = fragment.trim().trim_end_matches(['.', '!', '?']);
        if fragment.is_empty() {
            continue;
        }

        let (name, quantity) = split_quantity(fragment);
        if let Some(product) = match_product(&name, menu, synonyms) {
            items.push(ExtractedItem::new(product.name.clone(), quantity));
        }
    }

    items
}

fn split_quantity(fragment: &str) -> (String, i64) {
    if let Some(caps) = QTY_THEN_NAME.captures(fragment) {
        return (caps[2].trim().to_string(), caps[1].parse().unwrap_or(0));
    }
    if let Some(caps) = NAME_THEN_QTY.captures(fragment) {
        return (caps[1].trim().to_string(), caps[2].parse().unwrap_or(0));
    }
    if let Some(caps) = ARTICLE_NAME.captures(fragment) {
        return (caps[1].trim().to_string(), 1);
    }
    (fragment.to_string(), 1)
}

fn singular(word: &str) -> &str {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    }
}

fn significant_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(singular)
        .collect()
}

/// Resolve a free-text name to one menu product: exact name, synonym,
/// contained product name, then the unique best word overlap.
fn match_product<'a>(
    name: &str,
    menu: &[&'a Product],
    synonyms: &HashMap<String, String>,
) -> Option<&'a Product> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }

    let by_name = |target: &str| {
        let target = target.to_lowercase();
        menu.iter().copied().find(|p| p.name.to_lowercase() == target)
    };

    if let Some(product) = by_name(&name) {
        return Some(product);
    }

    let words = significant_words(&name);

    for (short, target) in synonyms {
        let hit = name == *short || words.iter().any(|w| *w == singular(short));
        if hit {
            if let Some(product) = by_name(target) {
                return Some(product);
            }
        }
    }

    if let Some(product) = menu
        .iter()
        .copied()
        .find(|p| name.contains(&p.name.to_lowercase()))
    {
        return Some(product);
    }

    let mut best: Option<(&Product, usize)> = None;
    let mut tied = false;
    for product in menu.iter().copied() {
        let product_name = product.name.to_lowercase();
        let product_words = significant_words(&product_name);
        let score = words
            .iter()
            .filter(|w| {
                product_words
                    .iter()
                    .any(|pw| pw == *w || (w.len() >= 4 && pw.contains(*w)))
            })
            .count();
        if score == 0 {
            continue;
        }
        match best {
            Some((_, top)) if score < top => {}
            Some((_, top)) if score == top => tied = true,
            _ => {
                best = Some((product, score));
                tied = false;
            }
        }
    }

    match best {
        Some((product, _)) if !tied => Some(product),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chowbot_core::GenerationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct ScriptedGenerator {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .ok_or_else(|| GenerationError::RetryExhausted {
                    attempts: 3,
                    last: "connection refused".to_string(),
                })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn product(name: &str, position: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            price: 10.0,
            stock: 10,
            is_available: true,
            position,
        }
    }

    fn menu() -> Vec<Product> {
        vec![
            product("Margherita Pizza", 1),
            product("Cheeseburger", 2),
            product("Salad", 3),
        ]
    }

    fn extractor(generator: Arc<ScriptedGenerator>) -> ItemExtractor {
        ItemExtractor::new(generator, HashMap::new(), 0.0)
    }

    #[tokio::test]
    async fn test_menu_codes_skip_generation() {
        let generator = ScriptedGenerator::replying("should not be used");
        let items = extractor(generator.clone()).extract("1x2 3", &menu()).await;

        assert_eq!(
            items,
            vec![
                ExtractedItem::new("Margherita Pizza", 2),
                ExtractedItem::new("Salad", 1),
            ]
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_structured_reply_is_used() {
        let generator =
            ScriptedGenerator::replying(r#"{"items": [{"product": "Cheeseburger", "quantity": 2}]}"#);
        let items = extractor(generator.clone()).extract("2x burger", &menu()).await;

        assert_eq!(items, vec![ExtractedItem::new("Cheeseburger", 2)]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embedded_json_is_recovered() {
        let generator = ScriptedGenerator::replying(
            "Sure! Here you go:\n```json\n{\"items\": [{\"product\": \"Salad\", \"quantity\": \"3\"}]}\n```",
        );
        let items = extractor(generator).extract("three salads", &menu()).await;
        assert_eq!(items, vec![ExtractedItem::new("Salad", 3)]);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_to_patterns() {
        let generator = ScriptedGenerator::replying("not json");
        let items = extractor(generator).extract("2x pizza", &menu()).await;
        assert_eq!(items, vec![ExtractedItem::new("Margherita Pizza", 2)]);
    }

    #[tokio::test]
    async fn test_unreachable_generator_falls_back_to_patterns() {
        let generator = ScriptedGenerator::unreachable();
        let items = extractor(generator)
            .extract("I want 2 cheeseburgers and a salad", &menu())
            .await;
        assert_eq!(
            items,
            vec![
                ExtractedItem::new("Cheeseburger", 2),
                ExtractedItem::new("Salad", 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_nothing_recognisable_yields_empty() {
        let generator = ScriptedGenerator::unreachable();
        let items = extractor(generator).extract("hello there", &menu()).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_synonyms_resolve_shorthand() {
        let mut synonyms = HashMap::new();
        synonyms.insert("Burger".to_string(), "Cheeseburger".to_string());
        let extractor = ItemExtractor::new(ScriptedGenerator::unreachable(), synonyms, 0.0);

        let items = extractor.extract("burgers 3", &menu()).await;
        assert_eq!(items, vec![ExtractedItem::new("Cheeseburger", 3)]);
    }

    #[test]
    fn test_reply_candidates_keep_bad_quantities_for_the_caller() {
        let items = parse_reply(r#"{"items": [{"product": "Salad"}, {"quantity": 2}]}"#);
        assert_eq!(
            items,
            vec![ExtractedItem::new("Salad", 0), ExtractedItem::new("", 2)]
        );
    }

    #[test]
    fn test_non_code_text_is_not_treated_as_codes() {
        let products = menu();
        let entries = menu_entries(&products);
        assert!(parse_menu_codes("2 pizzas", &entries).is_none());
        assert!(parse_menu_codes("   ", &entries).is_none());
    }

    #[test]
    fn test_unknown_codes_are_dropped() {
        let products = menu();
        let entries = menu_entries(&products);
        let items = parse_menu_codes("9x2, 2", &entries).unwrap();
        assert_eq!(items, vec![ExtractedItem::new("Cheeseburger", 1)]);
    }

    #[test]
    fn test_ambiguous_words_do_not_match() {
        let products = vec![
            product("Chicken Caesar Salad", 1),
            product("Chicken Wings", 2),
        ];
        let entries = menu_entries(&products);
        assert!(parse_locally("2 chicken", &entries, &HashMap::new()).is_empty());
        assert_eq!(
            parse_locally("2 wings", &entries, &HashMap::new()),
            vec![ExtractedItem::new("Chicken Wings", 2)]
        );
    }

    #[test]
    fn test_unavailable_products_are_not_on_the_menu() {
        let mut products = menu();
        products[0].is_available = false;
        let entries = menu_entries(&products);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Cheeseburger");
    }
}
