//! Knowledge-based folder organization.
//!
//! An organization run has two halves that never happen in the same
//! request. [`Organizer::propose`] looks at a directory, groups its files
//! by the customers, projects or topics they (or the indexed documents
//! most similar to them) mention, and stores the result as a plan. Nothing
//! on disk changes. Later, [`Organizer::confirm`] and
//! [`Organizer::execute`] move exactly the files the stored plan lists.
//!
//! Plans are identified by a blake3 hash of their content. Confirmation
//! re-hashes the stored plan and refuses to continue when the two differ,
//! so a plan is never re-derived or silently changed between preview and
//! execution.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    collaborators::{
        Entity,
        EntityExtractor,
        EntityKind,
        FilesystemOps,
        FsAction,
        FsRequest,
        PathOutcome,
        call_with_deadline,
    },
    collection::CollectionId,
    config_db::ConfigDb,
    doc_id::DocumentId,
    error::{Collaborator, Error, Result},
    fusion::{FusedResult, HybridFuser},
    text_util,
    walker::{self, DiscoveredFile, Filter},
};

/// Similar documents consulted per file.
pub const SIMILAR_PER_DOCUMENT: usize = 5;

/// Characters of a document used as its similarity query.
const QUERY_CHARS: usize = 300;

const UNSORTED: &str = "Unsorted";

const MAX_SEGMENT_CHARS: usize = 64;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum OrganizeMode {
    /// Group by topic, then by project.
    Themes,
    /// Group by customer, then by project.
    Knowledge,
}

impl OrganizeMode {
    /// Entity kinds that become folders, most specific first.
    fn folder_kinds(self) -> [(EntityKind, &'static str); 2] {
        match self {
            Self::Knowledge => [
                (EntityKind::Customer, "Customers"),
                (EntityKind::Project, "Projects"),
            ],
            Self::Themes => [
                (EntityKind::Topic, "Themes"),
                (EntityKind::Project, "Projects"),
            ],
        }
    }
}

impl std::fmt::Display for OrganizeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Themes => "themes",
            Self::Knowledge => "knowledge",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub document: DocumentId,
    pub from: PathBuf,
    pub to: PathBuf,
}

/// One target folder and the documents proposed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationProposal {
    pub target_folder_path: PathBuf,
    pub candidate_documents: Vec<DocumentId>,
    /// Similar indexed documents that informed the grouping, best first.
    pub confidence_basis: Vec<FusedResult>,
    pub moves: Vec<PlannedMove>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Proposed,
    Confirmed,
    /// Claimed by one execution; moves are in flight.
    Executing,
    Executed,
}

impl ProposalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
            Self::Executing => "executing",
            Self::Executed => "executed",
        }
    }
}

/// Everything one `propose` call produced, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationPlan {
    pub id: String,
    pub state: ProposalState,
    pub source_dir: PathBuf,
    pub target_root: PathBuf,
    pub mode: OrganizeMode,
    pub collection: String,
    pub proposals: Vec<OrganizationProposal>,
}

impl OrganizationPlan {
    /// Hash of everything except the id and the state.
    pub fn content_hash(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Content<'a> {
            source_dir: &'a Path,
            target_root: &'a Path,
            mode: OrganizeMode,
            collection: &'a str,
            proposals: &'a [OrganizationProposal],
        }

        let bytes = serde_json::to_vec(&Content {
            source_dir: &self.source_dir,
            target_root: &self.target_root,
            mode: self.mode,
            collection: &self.collection,
            proposals: &self.proposals,
        })?;
        Ok(blake3::hash(&bytes).to_hex()[..16].to_string())
    }

    pub fn move_count(&self) -> usize {
        self.proposals.iter().map(|p| p.moves.len()).sum()
    }

    fn require(
        &self,
        state: ProposalState,
        action: &'static str,
    ) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::InvalidProposalState {
                id: self.id.clone(),
                state: self.state.as_str(),
                action,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub id: String,
    pub outcomes: Vec<PathOutcome>,
}

impl ExecutionReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

pub struct Organizer {
    fuser: HybridFuser,
    entities: Arc<dyn EntityExtractor>,
    filesystem: Arc<dyn FilesystemOps>,
    store: Arc<ConfigDb>,
    deadline: Duration,
    min_score: f64,
}

impl Organizer {
    pub fn new(
        fuser: HybridFuser,
        entities: Arc<dyn EntityExtractor>,
        filesystem: Arc<dyn FilesystemOps>,
        store: Arc<ConfigDb>,
        min_score: f64,
    ) -> Self {
        let deadline = fuser.config().deadline;
        Self {
            fuser,
            entities,
            filesystem,
            store,
            deadline,
            min_score,
        }
    }

    /// Build and store a plan for the files directly inside `dir`.
    ///
    /// `destination` defaults to a sibling folder named `<dir>_organized`.
    pub async fn propose(
        &self,
        dir: &Path,
        mode: OrganizeMode,
        destination: Option<&Path>,
        collection: &CollectionId,
    ) -> Result<OrganizationPlan> {
        if !dir.is_dir() {
            return Err(Error::NotFound {
                kind: "directory",
                name: dir.display().to_string(),
            });
        }

        let target_root = match destination {
            Some(path) => path.to_path_buf(),
            None => default_target(dir)?,
        };

        let root = dir.to_path_buf();
        let files = call_with_deadline(
            Collaborator::Filesystem,
            self.deadline,
            move || walker::discover_files(&root, false, Filter::AllFiles),
        )
        .await?;

        let mut groups: BTreeMap<PathBuf, Group> = BTreeMap::new();
        let mut known: HashMap<DocumentId, BTreeSet<Entity>> = HashMap::new();

        for file in &files {
            let id = DocumentId::from_path(&file.absolute_path);
            let query = similarity_query(file);
            let similar = self
                .similar_to(&id, &query, SIMILAR_PER_DOCUMENT, collection)
                .await?;
            let own = self.entities_of(&id).await?;

            for hit in &similar {
                if known.contains_key(&hit.document_id) {
                    continue;
                }
                let entities = match self.entities_of(&hit.document_id).await {
                    Ok(entities) => entities,
                    Err(e) => {
                        warn!(
                            document = %hit.document_id,
                            error = %e,
                            "skipping entities of similar document"
                        );
                        BTreeSet::new()
                    }
                };
                known.insert(hit.document_id.clone(), entities);
            }

            let votes: Vec<(f64, &BTreeSet<Entity>)> = similar
                .iter()
                .filter_map(|hit| {
                    known.get(&hit.document_id).map(|e| (hit.rrf_score, e))
                })
                .collect();
            let folder = choose_folder(mode, &own, &votes);
            debug!(
                document = %id,
                folder = %folder.display(),
                similar = similar.len(),
                "grouped document"
            );

            let group = groups.entry(folder).or_default();
            group.files.push((id, file.absolute_path.clone()));
            group.basis.extend(similar);
        }

        let proposals = groups
            .into_iter()
            .map(|(folder, group)| {
                group.into_proposal(&target_root.join(folder))
            })
            .collect();

        let mut plan = OrganizationPlan {
            id: String::new(),
            state: ProposalState::Proposed,
            source_dir: dir.to_path_buf(),
            target_root,
            mode,
            collection: collection.to_string(),
            proposals,
        };
        plan.id = plan.content_hash()?;
        if self.store.get_proposal(&plan.id)?.is_some() {
            // Same content as a stored plan: keep that plan and its state.
            return self.show(&plan.id);
        }
        self.save(&plan)?;

        info!(
            id = %plan.id,
            %mode,
            folders = plan.proposals.len(),
            moves = plan.move_count(),
            "proposed organization"
        );
        Ok(plan)
    }

    /// A stored plan, in whatever state it is in.
    pub fn show(&self, id: &str) -> Result<OrganizationPlan> {
        let bytes = self.store.get_proposal(id)?.ok_or_else(|| {
            Error::NotFound {
                kind: "organization plan",
                name: id.to_string(),
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn list(&self) -> Result<Vec<OrganizationPlan>> {
        self.store
            .list_proposal_ids()?
            .iter()
            .map(|id| self.show(id))
            .collect()
    }

    /// Move a proposed plan to `Confirmed` after checking it is unchanged.
    pub fn confirm(&self, id: &str) -> Result<OrganizationPlan> {
        let plan = self.transition(
            id,
            ProposalState::Proposed,
            ProposalState::Confirmed,
            "confirm",
        )?;
        info!(id, "confirmed organization");
        Ok(plan)
    }

    /// Carry out a confirmed plan through the filesystem collaborator.
    ///
    /// The plan is claimed (`Executing`) before the first request, so
    /// only one caller carries it out. Per-file failures are reported in
    /// the outcomes and the plan ends `Executed`. If the collaborator
    /// itself fails, the plan goes back to `Confirmed`; running it again
    /// skips the moves that already landed.
    pub async fn execute(&self, id: &str) -> Result<ExecutionReport> {
        let plan = self.transition(
            id,
            ProposalState::Confirmed,
            ProposalState::Executing,
            "execute",
        )?;

        let outcomes = match self.carry_out(&plan).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.release(id);
                return Err(e);
            }
        };

        let report = ExecutionReport {
            id: plan.id,
            outcomes,
        };
        if report.all_succeeded() {
            self.transition(
                id,
                ProposalState::Executing,
                ProposalState::Executed,
                "finish",
            )?;
        } else {
            // Rerunning skips the moves that already happened.
            self.release(id);
        }
        info!(
            id,
            requests = report.outcomes.len(),
            ok = report.all_succeeded(),
            "executed organization"
        );
        Ok(report)
    }

    /// Hand an `Executing` plan back to `Confirmed` so it can be rerun.
    fn release(&self, id: &str) {
        if let Err(e) = self.transition(
            id,
            ProposalState::Executing,
            ProposalState::Confirmed,
            "release",
        ) {
            warn!(id, error = %e, "could not release plan");
        }
    }

    async fn carry_out(
        &self,
        plan: &OrganizationPlan,
    ) -> Result<Vec<PathOutcome>> {
        let mut outcomes = Vec::new();
        for proposal in &plan.proposals {
            outcomes.extend(
                self.apply(FsRequest {
                    action: FsAction::CreateDir,
                    path: proposal.target_folder_path.clone(),
                    destination: None,
                })
                .await?,
            );
            for planned in &proposal.moves {
                if planned.to.exists() && !planned.from.exists() {
                    outcomes.push(PathOutcome {
                        path: planned.from.clone(),
                        success: true,
                        detail: format!(
                            "already moved to {}",
                            planned.to.display()
                        ),
                    });
                    continue;
                }
                outcomes.extend(
                    self.apply(FsRequest {
                        action: FsAction::Move,
                        path: planned.from.clone(),
                        destination: Some(planned.to.clone()),
                    })
                    .await?,
                );
            }
        }
        Ok(outcomes)
    }

    /// Compare-and-set on the stored state, verified against the plan id,
    /// in a single write transaction.
    fn transition(
        &self,
        id: &str,
        from: ProposalState,
        to: ProposalState,
        action: &'static str,
    ) -> Result<OrganizationPlan> {
        let updated = self.store.update_proposal(id, |bytes| {
            let mut plan: OrganizationPlan = serde_json::from_slice(bytes)?;
            plan.require(from, action)?;
            verify(id, &plan)?;
            plan.state = to;
            Ok(serde_json::to_vec(&plan)?)
        })?;

        let bytes = updated.ok_or_else(|| Error::NotFound {
            kind: "organization plan",
            name: id.to_string(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Indexed documents most similar to the file at `path`.
    pub async fn find_similar(
        &self,
        path: &Path,
        top_k: usize,
        collection: &CollectionId,
    ) -> Result<Vec<FusedResult>> {
        if !path.is_file() {
            return Err(Error::NotFound {
                kind: "file",
                name: path.display().to_string(),
            });
        }

        let files = walker::discover_files(path, false, Filter::AllFiles)?;
        let Some(file) = files.first() else {
            return Ok(Vec::new());
        };

        let id = DocumentId::from_path(&file.absolute_path);
        self.similar_to(&id, &similarity_query(file), top_k, collection)
            .await
    }

    async fn similar_to(
        &self,
        id: &DocumentId,
        query: &str,
        top_k: usize,
        collection: &CollectionId,
    ) -> Result<Vec<FusedResult>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = self
            .fuser
            .fuse(query, top_k + 1, self.min_score, collection)
            .await?;
        hits.retain(|hit| &hit.document_id != id);
        hits.truncate(top_k);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        Ok(hits)
    }

    async fn entities_of(&self, id: &DocumentId) -> Result<BTreeSet<Entity>> {
        let extractor = Arc::clone(&self.entities);
        let id = id.clone();
        call_with_deadline(
            Collaborator::EntityExtraction,
            self.deadline,
            move || extractor.extract(&id),
        )
        .await
    }

    async fn apply(&self, request: FsRequest) -> Result<Vec<PathOutcome>> {
        let filesystem = Arc::clone(&self.filesystem);
        call_with_deadline(Collaborator::Filesystem, self.deadline, move || {
            filesystem.apply(&request)
        })
        .await
    }

    fn save(&self, plan: &OrganizationPlan) -> Result<()> {
        self.store.put_proposal(&plan.id, &serde_json::to_vec(plan)?)
    }
}

impl std::fmt::Debug for Organizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Organizer")
            .field("deadline", &self.deadline)
            .field("min_score", &self.min_score)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Group {
    files: Vec<(DocumentId, PathBuf)>,
    basis: Vec<FusedResult>,
}

impl Group {
    fn into_proposal(self, target_folder: &Path) -> OrganizationProposal {
        let moves = self
            .files
            .iter()
            .filter_map(|(id, from)| {
                let name = from.file_name()?;
                Some(PlannedMove {
                    document: id.clone(),
                    from: from.clone(),
                    to: target_folder.join(name),
                })
            })
            .collect();

        // Keep each similar document once, at its best score.
        let mut best: BTreeMap<DocumentId, FusedResult> = BTreeMap::new();
        for hit in self.basis {
            match best.get(&hit.document_id) {
                Some(seen) if seen.rrf_score >= hit.rrf_score => {}
                _ => {
                    best.insert(hit.document_id.clone(), hit);
                }
            }
        }
        let mut confidence_basis: Vec<_> = best.into_values().collect();
        confidence_basis.sort_by(|a, b| {
            b.rrf_score
                .total_cmp(&a.rrf_score)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });

        OrganizationProposal {
            target_folder_path: target_folder.to_path_buf(),
            candidate_documents: self
                .files
                .into_iter()
                .map(|(id, _)| id)
                .collect(),
            confidence_basis,
            moves,
        }
    }
}

fn verify(id: &str, plan: &OrganizationPlan) -> Result<()> {
    if plan.id == id && plan.content_hash()? == id {
        Ok(())
    } else {
        Err(Error::ProposalMismatch { id: id.to_string() })
    }
}

fn default_target(dir: &Path) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| {
            Error::Config(format!(
                "cannot derive a target folder for {}",
                dir.display()
            ))
        })?
        .to_string_lossy();
    Ok(dir.with_file_name(format!("{name}_organized")))
}

/// Query text standing in for a file: the head of a text document, or
/// the words of its file name.
fn similarity_query(file: &DiscoveredFile) -> String {
    if file.is_text()
        && let Ok(text) = std::fs::read_to_string(&file.absolute_path)
    {
        let head = text_util::document_head(&text, QUERY_CHARS);
        if !head.is_empty() {
            return head;
        }
    }

    file.absolute_path
        .file_stem()
        .map(|stem| {
            stem.to_string_lossy()
                .split(|c: char| matches!(c, '_' | '-' | '.'))
                .filter(|word| !word.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// Folder (relative to the target root) for a document.
///
/// The document's own entities decide first. Otherwise each similar
/// document votes for its entities with its fused score; the highest
/// total wins, ties going to the alphabetically first name.
fn choose_folder(
    mode: OrganizeMode,
    own: &BTreeSet<Entity>,
    votes: &[(f64, &BTreeSet<Entity>)],
) -> PathBuf {
    let kinds = mode.folder_kinds();

    for (kind, parent) in kinds {
        if let Some(segment) = own
            .iter()
            .filter(|e| e.kind == kind)
            .find_map(|e| sanitize_segment(&e.name))
        {
            return Path::new(parent).join(segment);
        }
    }

    for (kind, parent) in kinds {
        let mut tally: BTreeMap<String, f64> = BTreeMap::new();
        for (score, entities) in votes {
            for entity in entities.iter().filter(|e| e.kind == kind) {
                if let Some(segment) = sanitize_segment(&entity.name) {
                    *tally.entry(segment).or_default() += score;
                }
            }
        }

        let winner = tally
            .into_iter()
            .fold(None::<(String, f64)>, |best, (name, total)| match best {
                Some((_, top)) if top >= total => best,
                _ => Some((name, total)),
            });
        if let Some((segment, _)) = winner {
            return Path::new(parent).join(segment);
        }
    }

    PathBuf::from(UNSORTED)
}

/// Turn an entity name into a single safe path segment.
///
/// Separators and control characters become `_`, whitespace runs become
/// one space, and leading or trailing dots and spaces are removed, so
/// the result can never be empty, `.`, `..` or contain a separator.
pub fn sanitize_segment(name: &str) -> Option<String> {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '&')
            {
                c
            } else if c.is_whitespace() {
                ' '
            } else {
                '_'
            }
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    let segment: String = trimmed.chars().take(MAX_SEGMENT_CHARS).collect();
    let segment = segment.trim_end_matches(|c: char| c == '.' || c == ' ');

    (!segment.is_empty() && segment != "_").then(|| segment.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;
    use crate::{
        collaborators::{Ranker, Unconfigured},
        fusion::FusionConfig,
    };

    // -- Fakes --

    /// Returns the ids of the first key contained in the query.
    struct Lookup(Vec<(&'static str, Vec<DocumentId>)>);

    impl Ranker for Lookup {
        fn rank(
            &self,
            _collection: &CollectionId,
            query: &str,
            k: usize,
        ) -> Result<Vec<DocumentId>> {
            Ok(self
                .0
                .iter()
                .find(|(key, _)| query.contains(key))
                .map(|(_, ids)| ids.iter().take(k).cloned().collect())
                .unwrap_or_default())
        }
    }

    struct Known(HashMap<DocumentId, BTreeSet<Entity>>);

    impl EntityExtractor for Known {
        fn extract(&self, document: &DocumentId) -> Result<BTreeSet<Entity>> {
            Ok(self.0.get(document).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingFs(Mutex<Vec<FsRequest>>);

    impl FilesystemOps for RecordingFs {
        fn apply(&self, request: &FsRequest) -> Result<Vec<PathOutcome>> {
            self.0.lock().unwrap().push(request.clone());
            Ok(vec![PathOutcome {
                path: request.path.clone(),
                success: true,
                detail: "ok".to_string(),
            }])
        }
    }

    /// Fails the first move, then records like [`RecordingFs`]. With
    /// `reported` the failure is a per-path outcome instead of an error.
    #[derive(Default)]
    struct FailsFirstMove {
        failed: AtomicBool,
        reported: bool,
        inner: RecordingFs,
    }

    impl FilesystemOps for FailsFirstMove {
        fn apply(&self, request: &FsRequest) -> Result<Vec<PathOutcome>> {
            if request.action == FsAction::Move
                && !self.failed.swap(true, Ordering::SeqCst)
            {
                if self.reported {
                    return Ok(vec![PathOutcome {
                        path: request.path.clone(),
                        success: false,
                        detail: "permission denied".to_string(),
                    }]);
                }
                return Err(Error::unavailable(
                    Collaborator::Filesystem,
                    "disk went away",
                ));
            }
            self.inner.apply(request)
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        inbox: PathBuf,
        fs: Arc<RecordingFs>,
        db: Arc<ConfigDb>,
        fuser: HybridFuser,
        entities: Arc<dyn EntityExtractor>,
        organizer: Organizer,
    }

    impl Fixture {
        fn organizer_with(&self, fs: Arc<dyn FilesystemOps>) -> Organizer {
            Organizer::new(
                self.fuser.clone(),
                Arc::clone(&self.entities),
                fs,
                Arc::clone(&self.db),
                0.0,
            )
        }
    }

    fn one(kind: EntityKind, name: &str) -> BTreeSet<Entity> {
        BTreeSet::from([Entity::new(kind, name)])
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let inbox = tmp.path().canonicalize().unwrap().join("inbox");
        std::fs::create_dir(&inbox).unwrap();
        std::fs::write(inbox.join("acme.md"), "acme kickoff notes").unwrap();
        std::fs::write(inbox.join("apollo.md"), "apollo status").unwrap();
        std::fs::write(inbox.join("loose.md"), "globex invoice").unwrap();
        std::fs::write(inbox.join("misc.md"), "nothing in particular")
            .unwrap();

        let contract = DocumentId::new("/kb/globex-contract.md");
        let lexical = Lookup(vec![("globex", vec![contract.clone()])]);

        let id = |name: &str| DocumentId::from_path(&inbox.join(name));
        let entities = Known(HashMap::from([
            (id("acme.md"), one(EntityKind::Customer, "Acme Corp")),
            (id("apollo.md"), one(EntityKind::Project, "Apollo")),
            (id("misc.md"), one(EntityKind::Topic, "Travel")),
            (contract, one(EntityKind::Customer, "Globex")),
        ]));

        let fuser = HybridFuser::new(
            Arc::new(Unconfigured(Collaborator::SemanticSearch)),
            Arc::new(lexical),
            FusionConfig {
                rrf_k: 60.0,
                deadline: Duration::from_secs(5),
                degrade_gracefully: true,
                ..FusionConfig::default()
            },
        );
        let db = Arc::new(
            ConfigDb::open(&tmp.path().join("config.db")).unwrap(),
        );
        let fs = Arc::new(RecordingFs::default());
        let entities: Arc<dyn EntityExtractor> = Arc::new(entities);
        let organizer = Organizer::new(
            fuser.clone(),
            Arc::clone(&entities),
            fs.clone(),
            Arc::clone(&db),
            0.0,
        );

        Fixture {
            _tmp: tmp,
            inbox,
            fs,
            db,
            fuser,
            entities,
            organizer,
        }
    }

    fn collection() -> CollectionId {
        CollectionId::new("default")
    }

    fn folders(plan: &OrganizationPlan) -> Vec<String> {
        plan.proposals
            .iter()
            .map(|p| {
                p.target_folder_path
                    .strip_prefix(&plan.target_root)
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect()
    }

    // -- Proposal --

    #[tokio::test]
    async fn knowledge_mode_groups_by_customer_then_project() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();

        assert_eq!(
            folders(&plan),
            vec![
                "Customers/Acme Corp",
                "Customers/Globex",
                "Projects/Apollo",
                "Unsorted",
            ]
        );
        assert_eq!(plan.state, ProposalState::Proposed);
        assert_eq!(plan.move_count(), 4);

        let globex = &plan.proposals[1];
        assert_eq!(
            globex.candidate_documents,
            vec![DocumentId::from_path(&f.inbox.join("loose.md"))]
        );
        assert_eq!(
            globex.confidence_basis[0].document_id.as_str(),
            "/kb/globex-contract.md"
        );
    }

    #[tokio::test]
    async fn themes_mode_groups_by_topic() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Themes, None, &collection())
            .await
            .unwrap();

        assert_eq!(
            folders(&plan),
            vec!["Projects/Apollo", "Themes/Travel", "Unsorted"]
        );
    }

    #[tokio::test]
    async fn proposing_touches_nothing_and_is_stored() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();

        assert!(f.fs.0.lock().unwrap().is_empty());
        assert!(f.inbox.join("acme.md").exists());
        assert_eq!(f.organizer.show(&plan.id).unwrap(), plan);
        assert_eq!(f.organizer.list().unwrap(), vec![plan]);
    }

    #[tokio::test]
    async fn default_target_is_a_sibling_folder() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();

        assert_eq!(plan.target_root, f.inbox.with_file_name("inbox_organized"));
        let first = &plan.proposals[0].moves[0];
        assert_eq!(
            first.to,
            plan.target_root.join("Customers/Acme Corp/acme.md")
        );
    }

    #[tokio::test]
    async fn same_directory_gives_same_plan_id() {
        let f = fixture();
        let a = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        let b = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        let c = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Themes, None, &collection())
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    // -- State machine --

    #[tokio::test]
    async fn execute_requires_confirmation() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();

        let err = f.organizer.execute(&plan.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidProposalState {
                state: "proposed",
                action: "execute",
                ..
            }
        ));
        assert!(f.fs.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirmed_plan_executes_exactly_the_stored_moves() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();

        let confirmed = f.organizer.confirm(&plan.id).unwrap();
        assert_eq!(confirmed.state, ProposalState::Confirmed);

        let report = f.organizer.execute(&plan.id).await.unwrap();
        assert!(report.all_succeeded());

        let requests = f.fs.0.lock().unwrap().clone();
        let moved: Vec<_> = requests
            .iter()
            .filter(|r| r.action == FsAction::Move)
            .map(|r| (r.path.clone(), r.destination.clone().unwrap()))
            .collect();
        let planned: Vec<_> = plan
            .proposals
            .iter()
            .flat_map(|p| &p.moves)
            .map(|m| (m.from.clone(), m.to.clone()))
            .collect();
        assert_eq!(moved, planned);
        assert_eq!(
            requests
                .iter()
                .filter(|r| r.action == FsAction::CreateDir)
                .count(),
            plan.proposals.len()
        );

        assert_eq!(
            f.organizer.show(&plan.id).unwrap().state,
            ProposalState::Executed
        );
    }

    #[tokio::test]
    async fn executed_plan_cannot_run_again() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        f.organizer.confirm(&plan.id).unwrap();
        f.organizer.execute(&plan.id).await.unwrap();

        assert!(matches!(
            f.organizer.execute(&plan.id).await,
            Err(Error::InvalidProposalState { .. })
        ));
        assert!(matches!(
            f.organizer.confirm(&plan.id),
            Err(Error::InvalidProposalState { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_executions_run_the_plan_once() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        f.organizer.confirm(&plan.id).unwrap();
        assert!(matches!(
            f.organizer.confirm(&plan.id),
            Err(Error::InvalidProposalState {
                state: "confirmed",
                ..
            })
        ));

        let (a, b) = tokio::join!(
            f.organizer.execute(&plan.id),
            f.organizer.execute(&plan.id)
        );
        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );

        let moves = f
            .fs
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.action == FsAction::Move)
            .count();
        assert_eq!(moves, plan.move_count());
    }

    #[tokio::test]
    async fn interrupted_execution_can_be_resumed() {
        let f = fixture();
        let fs = Arc::new(FailsFirstMove::default());
        let organizer = f.organizer_with(fs.clone());
        let plan = organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        organizer.confirm(&plan.id).unwrap();

        let err = organizer.execute(&plan.id).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(
            organizer.show(&plan.id).unwrap().state,
            ProposalState::Confirmed
        );

        let report = organizer.execute(&plan.id).await.unwrap();
        assert!(report.all_succeeded());
        assert_eq!(
            organizer.show(&plan.id).unwrap().state,
            ProposalState::Executed
        );
    }

    #[tokio::test]
    async fn failed_moves_leave_the_plan_confirmed() {
        let f = fixture();
        let fs = Arc::new(FailsFirstMove {
            reported: true,
            ..FailsFirstMove::default()
        });
        let organizer = f.organizer_with(fs.clone());
        let plan = organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        organizer.confirm(&plan.id).unwrap();

        let report = organizer.execute(&plan.id).await.unwrap();
        assert!(!report.all_succeeded());
        assert_eq!(
            organizer.show(&plan.id).unwrap().state,
            ProposalState::Confirmed
        );

        let report = organizer.execute(&plan.id).await.unwrap();
        assert!(report.all_succeeded());
        assert_eq!(
            organizer.show(&plan.id).unwrap().state,
            ProposalState::Executed
        );
    }

    #[tokio::test]
    async fn reproposing_keeps_the_stored_state() {
        let f = fixture();
        let plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        f.organizer.confirm(&plan.id).unwrap();

        let again = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();
        assert_eq!(again.id, plan.id);
        assert_eq!(again.state, ProposalState::Confirmed);
    }

    #[tokio::test]
    async fn tampered_plan_is_refused() {
        let f = fixture();
        let mut plan = f
            .organizer
            .propose(&f.inbox, OrganizeMode::Knowledge, None, &collection())
            .await
            .unwrap();

        plan.proposals[0].moves[0].to = PathBuf::from("/tmp/elsewhere.md");
        f.db.put_proposal(&plan.id, &serde_json::to_vec(&plan).unwrap())
            .unwrap();

        assert!(matches!(
            f.organizer.confirm(&plan.id),
            Err(Error::ProposalMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let f = fixture();
        let missing = f.inbox.join("nope");
        assert!(matches!(
            f.organizer
                .propose(&missing, OrganizeMode::Knowledge, None, &collection())
                .await,
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_plan_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.organizer.confirm("0123456789abcdef"),
            Err(Error::NotFound { .. })
        ));
    }

    // -- Similarity --

    #[tokio::test]
    async fn find_similar_excludes_the_document_itself() {
        let f = fixture();
        let path = f.inbox.join("loose.md");

        let hits = f
            .organizer
            .find_similar(&path, 5, &collection())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id.as_str(), "/kb/globex-contract.md");
        assert_eq!(hits[0].rank, 1);
    }

    #[tokio::test]
    async fn find_similar_needs_a_file() {
        let f = fixture();
        assert!(matches!(
            f.organizer
                .find_similar(&f.inbox, 5, &collection())
                .await,
            Err(Error::NotFound { .. })
        ));
    }

    // -- Folder choice --

    #[test]
    fn own_entities_beat_votes() {
        let own = one(EntityKind::Project, "Apollo");
        let neighbor = one(EntityKind::Customer, "Globex");
        let folder = choose_folder(
            OrganizeMode::Knowledge,
            &own,
            &[(0.5, &neighbor)],
        );
        assert_eq!(folder, PathBuf::from("Projects/Apollo"));
    }

    #[test]
    fn votes_are_weighted_by_score() {
        let a = one(EntityKind::Customer, "Alpha");
        let b = one(EntityKind::Customer, "Beta");
        let folder = choose_folder(
            OrganizeMode::Knowledge,
            &BTreeSet::new(),
            &[(0.01, &a), (0.02, &b), (0.005, &a)],
        );
        assert_eq!(folder, PathBuf::from("Customers/Beta"));
    }

    #[test]
    fn nothing_known_is_unsorted() {
        let folder =
            choose_folder(OrganizeMode::Themes, &BTreeSet::new(), &[]);
        assert_eq!(folder, PathBuf::from("Unsorted"));
    }

    #[test]
    fn sanitize_segment_never_escapes() {
        assert_eq!(
            sanitize_segment("Acme Corp").as_deref(),
            Some("Acme Corp")
        );
        assert_eq!(
            sanitize_segment("  Müller   GmbH ").as_deref(),
            Some("Müller GmbH")
        );
        assert_eq!(sanitize_segment("R&D").as_deref(), Some("R&D"));

        for hostile in ["../../etc", "a/b", "..", ".", "C:\\x", "/"] {
            if let Some(segment) = sanitize_segment(hostile) {
                assert!(!segment.contains('/'), "{hostile:?} -> {segment:?}");
                assert!(!segment.contains('\\'), "{hostile:?} -> {segment:?}");
                assert!(segment != "." && segment != "..");
            }
        }
        assert_eq!(sanitize_segment(""), None);
        assert_eq!(sanitize_segment("..."), None);
    }
}
