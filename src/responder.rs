//! A generator that answers without a language model.
//!
//! Small talk and self-description come from fixed replies. Grounded
//! answers quote the passages of the fused documents that mention the
//! query, which keeps the binary useful until a real model is wired in.

use std::path::Path;

use crate::{
    collaborators::{GenerationMode, GenerationRequest, Generator},
    error::Result,
    ingestion::extract_title,
    text_util,
};

/// Documents quoted in a grounded answer.
const QUOTED_DOCUMENTS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalResponder;

impl Generator for LocalResponder {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        Ok(match &request.mode {
            GenerationMode::SmallTalk => small_talk(&request.query),
            GenerationMode::SelfDescription { collection } => {
                self_description(collection)
            }
            GenerationMode::Grounded => grounded(request),
        })
    }
}

fn small_talk(query: &str) -> String {
    let q = query.to_lowercase();
    let reply = if q.contains("danke") {
        "Gern geschehen!"
    } else if q.contains("thank") || q.contains("thx") {
        "You're welcome!"
    } else if ["bye", "see you", "ciao"].iter().any(|w| q.contains(w)) {
        "Goodbye!"
    } else if q.contains("tschüss") {
        "Tschüss!"
    } else if ["hallo", "guten", "moin", "servus", "wie geht"]
        .iter()
        .any(|w| q.contains(w))
    {
        "Hallo! Frag mich etwas zu deinen Dokumenten."
    } else {
        "Hello! Ask me about your documents, or tell me to list, index or \
         organize a folder."
    };
    reply.to_string()
}

fn self_description(collection: &str) -> String {
    format!(
        "I answer questions from the documents in the knowledge collection \
         '{collection}'. I can also list, create, move, copy and delete \
         files, index folders into a collection, switch between \
         collections, find documents similar to a file and propose a \
         customer or project folder structure for a directory."
    )
}

fn grounded(request: &GenerationRequest) -> String {
    if request.context.is_empty() {
        return "I found nothing in the indexed documents that answers this."
            .to_string();
    }

    let mut answer = String::from("From your documents:\n");
    for result in request.context.iter().take(QUOTED_DOCUMENTS) {
        let path = Path::new(result.document_id.as_str());
        let passage = std::fs::read_to_string(path).ok().map(|text| {
            let title = extract_title(&text, path);
            let snippet = best_snippet(&text, &request.query);
            (title, snippet)
        });

        answer.push_str(&format!("\n[{}] ", result.rank));
        match passage {
            Some((title, Some(snippet))) => {
                answer.push_str(&format!(
                    "{title} ({})\n{snippet}\n",
                    result.document_id
                ));
            }
            Some((title, None)) => {
                answer.push_str(&format!("{title} ({})\n", result.document_id));
            }
            None => {
                answer.push_str(&format!("{}\n", result.document_id));
            }
        }
    }

    answer.trim_end().to_string()
}

/// Snippet around the longest query word found in `text`.
fn best_snippet(text: &str, query: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let mut words: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .collect();
    words.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));

    let needle = words
        .into_iter()
        .find(|w| lowered.contains(&w.to_lowercase()))
        .unwrap_or("");
    text_util::extract_snippet(text, needle).map(|(snippet, _)| snippet)
}
