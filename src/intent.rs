//! Rule-based intent classification.
//!
//! Classification runs an ordered table of rules and returns the first
//! match. The order is part of the contract:
//!
//! 1. greeting (only without a path)
//! 2. collection command
//! 3. filesystem verb with a path
//! 4. index command
//! 5. meta question (only without a path)
//! 6. any remaining utterance with a path is a filesystem listing
//! 7. content question
//!
//! The last rule always matches, so classification is total.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::{
    error::{Error, Result},
    organizer::OrganizeMode,
    path_extract::{self, ExtractedPath},
    utterance::Utterance,
};

/// Tag of an [`Intent`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Greeting,
    MetaQuestion,
    FilesystemCommand,
    CollectionCommand,
    IndexCommand,
    ContentQuestion,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Greeting => "greeting",
            Self::MetaQuestion => "meta_question",
            Self::FilesystemCommand => "filesystem_command",
            Self::CollectionCommand => "collection_command",
            Self::IndexCommand => "index_command",
            Self::ContentQuestion => "content_question",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    MetaQuestion,
    FilesystemCommand(FilesystemCommand),
    CollectionCommand(CollectionRequest),
    IndexCommand(IndexCommand),
    ContentQuestion { query: String },
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::Greeting => IntentKind::Greeting,
            Self::MetaQuestion => IntentKind::MetaQuestion,
            Self::FilesystemCommand(_) => IntentKind::FilesystemCommand,
            Self::CollectionCommand(_) => IntentKind::CollectionCommand,
            Self::IndexCommand(_) => IntentKind::IndexCommand,
            Self::ContentQuestion { .. } => IntentKind::ContentQuestion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemOperation {
    List,
    Navigate,
    Tree,
    CreateDir,
    CreateFile,
    Move,
    Copy,
    Delete,
    Organize { mode: OrganizeMode },
    FindSimilar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilesystemCommand {
    pub operation: FilesystemOperation,
    pub path: ExtractedPath,
    /// Target of a move or copy.
    pub destination: Option<ExtractedPath>,
    /// Flag-like tokens (`-r`, `--force`) found in the command.
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CollectionRequest {
    Create { name: String },
    List,
    Switch { name: String },
    Delete { name: String },
    Info { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexCommand {
    /// Missing when the user did not say what to index.
    pub path: Option<ExtractedPath>,
    pub recursive: bool,
}

type Matcher = fn(&Utterance, Option<&ExtractedPath>) -> Option<Intent>;

/// One entry of the classification table.
pub struct Rule {
    pub name: &'static str,
    pub kind: IntentKind,
    matcher: Matcher,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "greeting",
        kind: IntentKind::Greeting,
        matcher: match_greeting,
    },
    Rule {
        name: "collection",
        kind: IntentKind::CollectionCommand,
        matcher: match_collection,
    },
    Rule {
        name: "filesystem_verb",
        kind: IntentKind::FilesystemCommand,
        matcher: match_filesystem_verb,
    },
    Rule {
        name: "index",
        kind: IntentKind::IndexCommand,
        matcher: match_index,
    },
    Rule {
        name: "meta",
        kind: IntentKind::MetaQuestion,
        matcher: match_meta,
    },
    Rule {
        name: "bare_path",
        kind: IntentKind::FilesystemCommand,
        matcher: match_bare_path,
    },
    Rule {
        name: "content",
        kind: IntentKind::ContentQuestion,
        matcher: match_content,
    },
];

/// Classify an utterance given the path extracted from it, if any.
pub fn classify(
    utterance: &Utterance,
    path: Option<&ExtractedPath>,
) -> Result<Intent> {
    for rule in RULES {
        if let Some(intent) = (rule.matcher)(utterance, path) {
            debug!(rule = rule.name, kind = %intent.kind(), "classified");
            return Ok(intent);
        }
    }

    Err(Error::ClassificationAmbiguous {
        utterance: utterance.raw().to_string(),
    })
}

/// Extract the path and classify in one step.
pub fn classify_text(raw: &str) -> Result<Intent> {
    let utterance = Utterance::new(raw);
    let path = path_extract::extract(utterance.raw());
    classify(&utterance, path.as_ref())
}

// -- Lexicons --

const POLITE: &str = r"(?:please |bitte |can you |could you |kannst du )?";

const COLLECTION_NOUN: &str = r"(?:knowledge[ -]?base|kb|collection|wissensdatenbank|wissensbasis|datenbank|sammlung)";

fn lexicon(pattern: &str) -> Regex {
    Regex::new(pattern).expect("lexicon patterns are valid regexes")
}

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    let phrase = r"(?:hello|hi|hey|hallo|moin|servus|howdy|good (?:morning|afternoon|evening)|guten (?:morgen|tag|abend)|thanks|thank you|thx|danke|dankeschön|vielen dank|bye|goodbye|see you|tschüss|ciao|how are you(?: doing)?|wie geht(?:'s| es dir| es ihnen)?)";
    let filler = r"(?:there|everyone|a lot|so much|very much|sehr|schön|dir|euch|alle)";
    lexicon(&format!(
        r"^{phrase}(?:[\s,!.]+(?:{phrase}|{filler}))*[\s,!.]*$"
    ))
});

static META: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(
        r"^(?:(?:what can you do|what do you do|who are you|what are you|how do you work|how does this work|what can i ask(?: you)?|what do you know|which (?:documents|files) do you (?:have|know)|was kannst du|wer bist du|was bist du|wie funktionierst du|was kann ich (?:dich )?fragen|was weißt du|welche dokumente (?:hast|kennst) du)\b|(?:help|hilfe)$)",
    )
});

static INDEX_VERB: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(&format!(
        r"^{POLITE}(?:index|indexiere|indiziere|ingest|import|importiere|load|lade|learn|lerne|scan|scanne)\b"
    ))
});

/// "add" only reads as indexing when something to add is named.
static INDEX_ADD: LazyLock<Regex> =
    LazyLock::new(|| lexicon(&format!(r"^{POLITE}(?:add|füge)\b")));

static RECURSIVE_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(r"(?:^|\s)(?:-r|--recursive|recursive|recursively|rekursiv)(?:\s|$)")
});

static FS_VERBS: LazyLock<Vec<(FsVerb, Regex)>> = LazyLock::new(|| {
    let table = [
        (
            FsVerb::FindSimilar,
            r"(?:(?:find|search|show|get|finde|suche|zeige?)\s+(?:me\s+|mir\s+)?(?:(?:documents|files|docs|dokumente|dateien)\s+)?(?:similar|ähnliche)|similar\s+(?:documents|files|docs)|ähnliche\s+(?:dokumente|dateien))",
        ),
        (
            FsVerb::Organize,
            r"(?:organi[sz]e|tidy(?: up)?|clean up|sort|organisiere|strukturiere|räume?)\b",
        ),
        (
            FsVerb::Move,
            r"(?:mv|move|rename|verschiebe|benenne)\b",
        ),
        (FsVerb::Copy, r"(?:cp|copy|kopiere)\b"),
        (
            FsVerb::Delete,
            r"(?:rm|delete|remove|lösche|entferne)\b",
        ),
        (
            FsVerb::CreateFile,
            r"(?:touch|(?:create|make)\s+(?:an?\s+|the\s+)?(?:new\s+|empty\s+)?file|erstelle\s+(?:eine\s+)?(?:neue\s+|leere\s+)?datei)\b",
        ),
        (
            FsVerb::CreateDir,
            r"(?:mkdir|(?:create|make)\s+(?:an?\s+|the\s+)?(?:new\s+)?(?:folder|directory|dir)|erstelle\s+(?:einen\s+|ein\s+)?(?:neuen\s+|neues\s+)?(?:ordner|verzeichnis))\b",
        ),
        (
            FsVerb::Tree,
            r"(?:tree|show\s+(?:me\s+)?(?:the\s+)?(?:tree|structure)|zeige?\s+(?:mir\s+)?(?:den\s+|die\s+)?(?:baum|struktur)|baum|struktur)\b",
        ),
        (
            FsVerb::Navigate,
            r"(?:cd|navigate|go|switch|change\s+(?:directory|dir)|open|gehe?|navigiere|wechs(?:el|le)|öffne)\b",
        ),
        (
            FsVerb::List,
            r"(?:ls|list|show|display|what(?:'s|\s+is)\s+in|whats\s+in|zeige?|liste|inhalt|was\s+(?:ist|liegt|befindet\s+sich)\s+in)\b",
        ),
    ];

    table
        .into_iter()
        .map(|(verb, pattern)| (verb, lexicon(&format!("^{POLITE}{pattern}"))))
        .collect()
});

static KNOWLEDGE_MODE: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(
        r"\b(?:knowledge|wissen|wissensbasiert|intelligent|smart|by (?:customers?|projects?)|nach (?:kunden?|projekten?))\b",
    )
});

static DESTINATION_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| lexicon(r"(?i)\s(?:to|into|nach|in|zu|as|als)\s"));

static COLLECTION_LIST: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(
        r"(?i)^(?:(?:please |bitte )?(?:show|list|display|zeige?|liste)(?: me| mir)?(?: all| alle)?(?: the| my| die| meine)? (?:knowledge[ -]?bases|kbs|collections|wissensdatenbanken|datenbanken|sammlungen)$|(?:which|what) (?:knowledge[ -]?bases|collections)\b|welche (?:wissensdatenbanken|datenbanken|sammlungen)\b)",
    )
});

static COLLECTION_CREATE: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(&format!(
        r"(?i)^(?:please |bitte )?(?:create|make|add|new|erstelle|neue)\s+(?:(?:a|an|eine|einen|new|neue)\s+)*{COLLECTION_NOUN}\s+(?:(?:named|called|namens|genannt|mit dem namen)\s+)?(?P<name>\S+)"
    ))
});

static COLLECTION_DELETE: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(&format!(
        r"(?i)^(?:please |bitte )?(?:delete|remove|drop|lösche|entferne)\s+(?:(?:the|my|die|den|das|meine?)\s+)?{COLLECTION_NOUN}\s+(?:(?:named|called|namens)\s+)?(?P<name>\S+)"
    ))
});

/// `delete the <name> collection`, with the noun after the name.
static COLLECTION_DELETE_NAME_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(&format!(
        r"(?i)^(?:please |bitte )?(?:delete|remove|drop|lösche|entferne)\s+(?:(?:the|my|die|den|das|meine?)\s+)?(?P<name>\S+)\s+{COLLECTION_NOUN}[.!?]*$"
    ))
});

static COLLECTION_SWITCH: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(&format!(
        r"(?i)^(?:please |bitte )?(?:switch|change|use|select|wechs(?:el|le)|nutze|verwende|benutze)\s+(?:(?:to|zu|zur|zum|the|die|der)\s+)*{COLLECTION_NOUN}\s+(?P<name>\S+)"
    ))
});

/// `switch to <name>` without a collection noun.
static COLLECTION_SWITCH_BARE: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(
        r"(?i)^(?:switch|wechs(?:el|le))\s+(?:to|zu|zur|zum)\s+(?P<name>[^\s/~.]\S*)$",
    )
});

static COLLECTION_INFO: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(&format!(
        r"(?i)^(?:(?:show|zeige?)\s+)?(?:info|information|informationen|details|describe|beschreibe)\s+(?:(?:about|on|for|of|the|über|zu|zur|von|der|die)\s+)*{COLLECTION_NOUN}\s+(?P<name>\S+)"
    ))
});

/// `info <name>` without a collection noun.
static COLLECTION_INFO_BARE: LazyLock<Regex> = LazyLock::new(|| {
    lexicon(r"(?i)^(?:info|informationen|details)\s+(?P<name>\S+)$")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsVerb {
    FindSimilar,
    Organize,
    Move,
    Copy,
    Delete,
    CreateFile,
    CreateDir,
    Tree,
    Navigate,
    List,
}

// -- Matchers --

fn match_greeting(
    utterance: &Utterance,
    path: Option<&ExtractedPath>,
) -> Option<Intent> {
    (path.is_none() && GREETING.is_match(utterance.normalized()))
        .then_some(Intent::Greeting)
}

fn match_collection(
    utterance: &Utterance,
    path: Option<&ExtractedPath>,
) -> Option<Intent> {
    let text = utterance.text();

    if COLLECTION_LIST.is_match(text) {
        return Some(Intent::CollectionCommand(CollectionRequest::List));
    }

    let request = if let Some(name) = capture_name(text, &COLLECTION_CREATE) {
        CollectionRequest::Create { name }
    } else if let Some(name) = capture_name(text, &COLLECTION_DELETE)
        .or_else(|| capture_name(text, &COLLECTION_DELETE_NAME_FIRST))
    {
        CollectionRequest::Delete { name }
    } else if let Some(name) = capture_name(text, &COLLECTION_SWITCH) {
        CollectionRequest::Switch { name }
    } else if let Some(name) = capture_name(text, &COLLECTION_INFO) {
        CollectionRequest::Info { name }
    } else if path.is_some() {
        return None;
    } else if let Some(name) = capture_name(text, &COLLECTION_SWITCH_BARE) {
        CollectionRequest::Switch { name }
    } else if let Some(name) = capture_name(text, &COLLECTION_INFO_BARE) {
        CollectionRequest::Info { name }
    } else {
        return None;
    };

    Some(Intent::CollectionCommand(request))
}

fn match_filesystem_verb(
    utterance: &Utterance,
    path: Option<&ExtractedPath>,
) -> Option<Intent> {
    let path = path?;
    let normalized = utterance.normalized();
    let verb = FS_VERBS
        .iter()
        .find(|(_, re)| re.is_match(normalized))
        .map(|(verb, _)| *verb)?;

    let operation = match verb {
        FsVerb::FindSimilar => FilesystemOperation::FindSimilar,
        FsVerb::Organize => {
            let mode = if KNOWLEDGE_MODE.is_match(normalized) {
                OrganizeMode::Knowledge
            } else {
                OrganizeMode::Themes
            };
            FilesystemOperation::Organize { mode }
        }
        FsVerb::Move => FilesystemOperation::Move,
        FsVerb::Copy => FilesystemOperation::Copy,
        FsVerb::Delete => FilesystemOperation::Delete,
        FsVerb::CreateFile => FilesystemOperation::CreateFile,
        FsVerb::CreateDir => FilesystemOperation::CreateDir,
        FsVerb::Tree => FilesystemOperation::Tree,
        FsVerb::Navigate => FilesystemOperation::Navigate,
        FsVerb::List => FilesystemOperation::List,
    };

    let (path, destination) = match operation {
        FilesystemOperation::Move | FilesystemOperation::Copy => {
            transfer_endpoints(utterance.raw(), path)
        }
        _ => (path.clone(), None),
    };

    Some(Intent::FilesystemCommand(FilesystemCommand {
        operation,
        path,
        destination,
        extra_args: flag_args(utterance.raw()),
    }))
}

fn match_index(
    utterance: &Utterance,
    path: Option<&ExtractedPath>,
) -> Option<Intent> {
    let normalized = utterance.normalized();
    let is_index = INDEX_VERB.is_match(normalized)
        || (path.is_some() && INDEX_ADD.is_match(normalized));

    is_index.then(|| {
        Intent::IndexCommand(IndexCommand {
            path: path.cloned(),
            recursive: RECURSIVE_FLAG.is_match(normalized),
        })
    })
}

fn match_meta(
    utterance: &Utterance,
    path: Option<&ExtractedPath>,
) -> Option<Intent> {
    (path.is_none() && META.is_match(utterance.normalized()))
        .then_some(Intent::MetaQuestion)
}

fn match_bare_path(
    utterance: &Utterance,
    path: Option<&ExtractedPath>,
) -> Option<Intent> {
    path.map(|path| {
        Intent::FilesystemCommand(FilesystemCommand {
            operation: FilesystemOperation::List,
            path: path.clone(),
            destination: None,
            extra_args: flag_args(utterance.raw()),
        })
    })
}

fn match_content(
    utterance: &Utterance,
    _path: Option<&ExtractedPath>,
) -> Option<Intent> {
    Some(Intent::ContentQuestion {
        query: utterance.raw().trim().to_string(),
    })
}

// -- Helpers --

/// Split a move/copy command into source and destination.
///
/// With a separator word (`to`, `into`, `nach`, ...) the source is the
/// path before it and the destination the path after it. Without one,
/// the destination is the next path after the source.
fn transfer_endpoints(
    raw: &str,
    primary: &ExtractedPath,
) -> (ExtractedPath, Option<ExtractedPath>) {
    let scope = path_extract::command_scope(raw);

    if let Some(sep) = DESTINATION_SEPARATOR.find(scope)
        && let Some(source) = path_extract::extract(&scope[..sep.start()])
    {
        let destination = shifted(&scope[sep.end()..], sep.end());
        return (source, destination);
    }

    let tail = primary.offset + primary.raw_text_span.len();
    let destination = scope.get(tail..).and_then(|rest| shifted(rest, tail));
    (primary.clone(), destination)
}

fn shifted(text: &str, by: usize) -> Option<ExtractedPath> {
    path_extract::extract(text).map(|mut path| {
        path.offset += by;
        path
    })
}

fn flag_args(raw: &str) -> Vec<String> {
    path_extract::command_scope(raw)
        .split_whitespace()
        .filter(|token| token.len() > 1 && token.starts_with('-'))
        .map(str::to_string)
        .collect()
}

/// Words that can sit where a name is expected but never are one.
const NOT_A_NAME: &[&str] = &[
    "the", "my", "a", "an", "die", "den", "das", "der", "mein", "meine",
];

fn capture_name(text: &str, re: &Regex) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.name("name").map(|m| clean_name(m.as_str())))
        .filter(|name| {
            !name.is_empty()
                && !NOT_A_NAME.iter().any(|w| w.eq_ignore_ascii_case(name))
        })
}

fn clean_name(name: &str) -> String {
    name.trim_matches(|c: char| {
        matches!(c, '"' | '\'' | '`' | ',' | '.' | ';' | ':' | '!' | '?')
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn kind_of(text: &str) -> IntentKind {
        classify_text(text).unwrap().kind()
    }

    fn fs_command(text: &str) -> FilesystemCommand {
        match classify_text(text).unwrap() {
            Intent::FilesystemCommand(cmd) => cmd,
            other => panic!("expected filesystem command, got {other:?}"),
        }
    }

    fn collection_request(text: &str) -> CollectionRequest {
        match classify_text(text).unwrap() {
            Intent::CollectionCommand(req) => req,
            other => panic!("expected collection command, got {other:?}"),
        }
    }

    #[test]
    fn rule_order_is_fixed() {
        let names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "greeting",
                "collection",
                "filesystem_verb",
                "index",
                "meta",
                "bare_path",
                "content",
            ]
        );
        assert_eq!(
            RULES.last().map(|r| r.kind),
            Some(IntentKind::ContentQuestion)
        );
    }

    #[test]
    fn lexicons_compile() {
        LazyLock::force(&GREETING);
        LazyLock::force(&META);
        LazyLock::force(&INDEX_VERB);
        LazyLock::force(&INDEX_ADD);
        LazyLock::force(&RECURSIVE_FLAG);
        assert_eq!(FS_VERBS.len(), 10);
        LazyLock::force(&KNOWLEDGE_MODE);
        LazyLock::force(&DESTINATION_SEPARATOR);
        LazyLock::force(&COLLECTION_LIST);
        LazyLock::force(&COLLECTION_CREATE);
        LazyLock::force(&COLLECTION_DELETE);
        LazyLock::force(&COLLECTION_SWITCH);
        LazyLock::force(&COLLECTION_SWITCH_BARE);
        LazyLock::force(&COLLECTION_INFO);
        LazyLock::force(&COLLECTION_INFO_BARE);
    }

    #[test]
    fn plain_greetings() {
        assert_eq!(kind_of("hello"), IntentKind::Greeting);
        assert_eq!(kind_of("Thanks a lot!"), IntentKind::Greeting);
        assert_eq!(kind_of("Guten Morgen"), IntentKind::Greeting);
        assert_eq!(kind_of("hi there, thanks"), IntentKind::Greeting);
    }

    #[test]
    fn greeting_followed_by_question_is_content() {
        assert_eq!(kind_of("Hallo, was ist RAG?"), IntentKind::ContentQuestion);
    }

    #[test]
    fn greeting_with_path_is_filesystem() {
        assert_eq!(
            kind_of("hi, indexiere /Users/test"),
            IntentKind::FilesystemCommand
        );
        let cmd = fs_command("thanks, now index ~/Desktop");
        assert_eq!(cmd.operation, FilesystemOperation::List);
        assert_eq!(cmd.path.normalized_path, "~/Desktop");
    }

    #[test]
    fn meta_questions() {
        assert_eq!(kind_of("What can you do?"), IntentKind::MetaQuestion);
        assert_eq!(kind_of("wer bist du"), IntentKind::MetaQuestion);
        assert_eq!(kind_of("help"), IntentKind::MetaQuestion);
    }

    #[test]
    fn meta_question_with_path_is_filesystem() {
        assert_eq!(
            kind_of("was kannst du in /Users/test finden"),
            IntentKind::FilesystemCommand
        );
    }

    #[test]
    fn help_with_a_task_is_content() {
        assert_eq!(
            kind_of("help me summarize the Q3 report"),
            IntentKind::ContentQuestion
        );
    }

    #[test]
    fn collection_create_keeps_name_case() {
        assert_eq!(
            collection_request("create knowledge base Projects-2025"),
            CollectionRequest::Create {
                name: "Projects-2025".into()
            }
        );
        assert_eq!(
            collection_request("erstelle wissensdatenbank rechnungen"),
            CollectionRequest::Create {
                name: "rechnungen".into()
            }
        );
    }

    #[test]
    fn collection_list() {
        assert_eq!(
            collection_request("show all knowledge bases"),
            CollectionRequest::List
        );
        assert_eq!(
            collection_request("welche datenbanken gibt es?"),
            CollectionRequest::List
        );
    }

    #[test]
    fn collection_switch_without_noun_needs_name_not_path() {
        assert_eq!(
            collection_request("switch to projekt-2025"),
            CollectionRequest::Switch {
                name: "projekt-2025".into()
            }
        );

        let cmd = fs_command("wechsel zu /Users/test");
        assert_eq!(cmd.operation, FilesystemOperation::Navigate);
    }

    #[test]
    fn collection_delete_wins_over_filesystem_path() {
        assert_eq!(
            collection_request("delete collection /tmp/docs"),
            CollectionRequest::Delete {
                name: "/tmp/docs".into()
            }
        );
    }

    #[test]
    fn collection_delete_accepts_name_before_noun() {
        for (text, name) in [
            ("delete the default collection", "default"),
            ("Please remove my archive knowledge base.", "archive"),
            ("lösche die projekte sammlung", "projekte"),
            ("remove the knowledge base called notes", "notes"),
            ("delete my collection research", "research"),
        ] {
            assert_eq!(
                collection_request(text),
                CollectionRequest::Delete { name: name.into() },
                "{text}"
            );
        }
    }

    #[test]
    fn articles_are_never_collection_names() {
        assert_ne!(
            kind_of("delete the knowledge base"),
            IntentKind::CollectionCommand
        );
    }

    #[test]
    fn collection_info() {
        assert_eq!(
            collection_request("info about the collection notes"),
            CollectionRequest::Info {
                name: "notes".into()
            }
        );
        assert_eq!(
            collection_request("info projekt-2025"),
            CollectionRequest::Info {
                name: "projekt-2025".into()
            }
        );
    }

    #[test]
    fn filesystem_verbs() {
        let cases = [
            ("delete /tmp/old.txt", FilesystemOperation::Delete),
            ("mkdir /tmp/new", FilesystemOperation::CreateDir),
            ("create a new folder /tmp/x", FilesystemOperation::CreateDir),
            ("touch /tmp/x.txt", FilesystemOperation::CreateFile),
            ("tree /Users/test", FilesystemOperation::Tree),
            ("show the structure of /srv", FilesystemOperation::Tree),
            ("cd ~/Desktop", FilesystemOperation::Navigate),
            ("ls /Users/test", FilesystemOperation::List),
            ("what's in /tmp?", FilesystemOperation::List),
            ("zeige /Users/test", FilesystemOperation::List),
            ("copy ~/a.txt /tmp", FilesystemOperation::Copy),
            (
                "find similar documents to ~/report.md",
                FilesystemOperation::FindSimilar,
            ),
        ];

        for (text, expected) in cases {
            assert_eq!(fs_command(text).operation, expected, "for {text:?}");
        }
    }

    #[test]
    fn organize_modes() {
        assert_eq!(
            fs_command("organize ~/Downloads").operation,
            FilesystemOperation::Organize {
                mode: OrganizeMode::Themes
            }
        );
        assert_eq!(
            fs_command("organize ~/Downloads by customer").operation,
            FilesystemOperation::Organize {
                mode: OrganizeMode::Knowledge
            }
        );
    }

    #[test]
    fn move_splits_source_and_destination() {
        let cmd = fs_command("move ~/a.txt to /srv/archive");
        assert_eq!(cmd.operation, FilesystemOperation::Move);
        assert_eq!(cmd.path.normalized_path, "~/a.txt");
        let dest = cmd.destination.unwrap();
        assert_eq!(dest.normalized_path, "/srv/archive");
        assert_eq!(dest.offset, "move ~/a.txt to ".len());
    }

    #[test]
    fn copy_without_separator_takes_next_path() {
        let cmd = fs_command("cp /srv/a.txt /srv/b.txt");
        assert_eq!(cmd.path.normalized_path, "/srv/a.txt");
        assert_eq!(
            cmd.destination.map(|d| d.normalized_path),
            Some("/srv/b.txt".to_string())
        );
    }

    #[test]
    fn flags_are_collected() {
        let cmd = fs_command("rm -r /tmp/scratch");
        assert_eq!(cmd.extra_args, vec!["-r".to_string()]);
    }

    #[test]
    fn index_with_and_without_path() {
        match classify_text("index ~/Desktop -r").unwrap() {
            Intent::IndexCommand(cmd) => {
                assert!(cmd.recursive);
                assert_eq!(cmd.path.unwrap().normalized_path, "~/Desktop");
            }
            other => panic!("expected index command, got {other:?}"),
        }

        match classify_text("indexiere").unwrap() {
            Intent::IndexCommand(cmd) => {
                assert!(cmd.path.is_none());
                assert!(!cmd.recursive);
            }
            other => panic!("expected index command, got {other:?}"),
        }
    }

    #[test]
    fn add_needs_a_path_to_index() {
        assert_eq!(kind_of("add ~/notes"), IntentKind::IndexCommand);
        assert_eq!(kind_of("add 2 and 3"), IntentKind::ContentQuestion);
    }

    #[test]
    fn slash_words_stay_content() {
        assert_eq!(kind_of("What is TCP/IP?"), IntentKind::ContentQuestion);
    }

    #[test]
    fn content_question_keeps_query() {
        assert_eq!(
            classify_text("  What is RAG? ").unwrap(),
            Intent::ContentQuestion {
                query: "What is RAG?".into()
            }
        );
    }

    #[test]
    fn empty_input_is_content() {
        assert_eq!(kind_of(""), IntentKind::ContentQuestion);
    }

    #[test]
    fn intent_serializes_with_tag() {
        let json = serde_json::to_value(classify_text("ls /tmp").unwrap())
            .unwrap();
        assert_eq!(json["intent"], "filesystem_command");
        assert_eq!(json["operation"], "list");
        assert_eq!(json["path"]["normalized_path"], "/tmp");
    }

    const GREETINGS: &[&str] =
        &["hi", "hello", "hey", "thanks", "danke", "good morning", "moin"];
    const SEPARATORS: &[&str] = &[" ", ", ", "! "];
    const FILLERS: &[&str] = &["", "now ", "look at "];

    proptest! {
        #[test]
        fn classification_is_total(text in ".{0,80}") {
            prop_assert!(classify_text(&text).is_ok());
        }

        #[test]
        fn classification_is_deterministic(text in ".{0,80}") {
            prop_assert_eq!(
                classify_text(&text).unwrap(),
                classify_text(&text).unwrap()
            );
        }

        #[test]
        fn greeting_plus_path_is_filesystem(
            greeting in proptest::sample::select(GREETINGS),
            separator in proptest::sample::select(SEPARATORS),
            filler in proptest::sample::select(FILLERS),
            home in any::<bool>(),
            segments in proptest::collection::vec("[A-Za-z]{1,8}", 1..4),
        ) {
            let root = if home { "~/" } else { "/" };
            let text = format!(
                "{greeting}{separator}{filler}{root}{}",
                segments.join("/")
            );
            prop_assert_eq!(kind_of(&text), IntentKind::FilesystemCommand);
        }
    }
}
