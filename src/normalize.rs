use crate::binding::{
    BindingEntry, CreateFn, DedupKey, DepRequest, EntryKind, MakeVecFn, MultiCreateFn, NodeIndex,
};
use crate::component::Component;
use crate::errors::{join_names, InjectError};
use crate::lazy_component::{LazyEntry, LazyKey};
use crate::semistatic_graph::{CreateKind, Node, NodeState};
use crate::semistatic_map::SemistaticMap;
use crate::type_info::TypeId;
use std::any::Any;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Stable storage for the typed pointer word of an instance binding. The
/// cell is shared by every injector built from the owning component.
#[repr(align(16))]
pub(crate) struct InstanceCell(pub(crate) [*const (); 2]);

impl InstanceCell {
    fn boxed(word: *const ()) -> Box<InstanceCell> {
        Box::new(InstanceCell([word, std::ptr::null()]))
    }

    pub(crate) fn ptr(&self) -> *const () {
        self.0.as_ptr() as *const ()
    }
}

#[derive(Clone, Copy)]
pub(crate) enum TemplateState {
    /// Referenced but not bound: a requirement of the component.
    Missing,
    Pending(CreateKind),
    /// Instance binding: terminal from the start.
    Instance(*const ()),
}

pub(crate) struct TemplateNode {
    pub key: TypeId,
    pub edges: (u32, u32),
    pub state: TemplateState,
    pub dedup: Option<DedupKey>,
}

#[derive(Clone, Copy)]
pub(crate) enum MultiElemTemplate {
    Instance { cell: *const () },
    Construct { create: MultiCreateFn },
}

pub(crate) struct MultiTemplate {
    pub key: TypeId,
    pub elems: Vec<(MultiElemTemplate, DedupKey)>,
    pub make_vec: MakeVecFn,
}

/// Everything needed to roll a binding compression back when a later extra
/// component invalidates its conditions.
pub(crate) struct CompressionUndo {
    pub interface: TypeId,
    pub iface_create: CreateFn,
    pub class_create: CreateFn,
    pub class_deps: Vec<DepRequest>,
    pub class_dedup: DedupKey,
}

/// A component after expansion, deduplication, conflict checking, binding
/// compression, and graph assembly. Immutable; share it with `Arc` and build
/// any number of injectors from it.
pub struct NormalizedComponent {
    pub(crate) map: SemistaticMap<TypeId, NodeIndex>,
    pub(crate) nodes: Vec<TemplateNode>,
    pub(crate) edges: Vec<NodeIndex>,
    pub(crate) multis: Vec<MultiTemplate>,
    pub(crate) total_arena_bytes: usize,
    pub(crate) keep_alive: Vec<Arc<dyn Any + Send + Sync>>,
    pub(crate) instance_cells: Vec<Box<InstanceCell>>,
    pub(crate) undo: HashMap<TypeId, CompressionUndo>,
}

// The raw pointers inside point at the shared keep-alive instances (Send +
// Sync by construction) or are function pointers; nothing here is mutated
// after construction.
unsafe impl Send for NormalizedComponent {}
unsafe impl Sync for NormalizedComponent {}

impl NormalizedComponent {
    pub fn new(component: Component) -> anyhow::Result<NormalizedComponent> {
        if let Some(error) = component.error {
            return Err(error.into());
        }
        let flat = expand_entries(component.entries)?;
        let mut folded = fold_entries(flat)?;
        check_cycles(&folded)?;
        compress_bindings(&mut folded);
        Ok(build_template(folded))
    }

    /// Types this component needs but does not provide.
    pub fn requirements(&self) -> Vec<TypeId> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.state, TemplateState::Missing))
            .map(|n| n.key)
            .collect()
    }

    /// Types this component provides (multibindings not included).
    pub fn provides(&self) -> Vec<TypeId> {
        self.nodes
            .iter()
            .filter(|n| !matches!(n.state, TemplateState::Missing))
            .map(|n| n.key)
            .collect()
    }
}

// --- phase N1: lazy-component expansion ------------------------------------

fn expand_entries(entries: Vec<BindingEntry>) -> Result<Vec<BindingEntry>, InjectError> {
    let mut seen: HashSet<LazyKey> = HashSet::new();
    let mut replacements: HashMap<LazyKey, LazyEntry> = HashMap::new();
    let mut out = Vec::new();
    expand_list(entries, &mut seen, &mut replacements, &mut out)?;
    Ok(out)
}

fn collect_replacements(
    entries: &[BindingEntry],
    replacements: &mut HashMap<LazyKey, LazyEntry>,
) -> Result<(), InjectError> {
    let mut iter = entries.iter().peekable();
    while let Some(entry) = iter.next() {
        let EntryKind::Replaced(replaced) = &entry.kind else {
            continue;
        };
        let replacement = match iter.peek() {
            Some(next) => match &next.kind {
                EntryKind::Replacement(replacement) => replacement,
                _ => unreachable!("replacement entries are always emitted in pairs"),
            },
            None => unreachable!("replacement entries are always emitted in pairs"),
        };
        iter.next();

        let replaced_key = replaced.key();
        let replacement_key = replacement.key();
        if replaced_key == replacement_key {
            return Err(InjectError::ComponentReplacementInItself {
                type_name: replaced.fun_name,
            });
        }
        match replacements.get(&replaced_key) {
            Some(previous) if previous.key() != replacement_key => {
                return Err(InjectError::DoubleReplacement {
                    type_name: replaced.fun_name,
                });
            }
            Some(_) => {}
            None => {
                replacements.insert(replaced_key, replacement.clone());
            }
        }
    }
    Ok(())
}

fn expand_list(
    entries: Vec<BindingEntry>,
    seen: &mut HashSet<LazyKey>,
    replacements: &mut HashMap<LazyKey, LazyEntry>,
    out: &mut Vec<BindingEntry>,
) -> Result<(), InjectError> {
    // Replacements are gathered before anything in this list is expanded, so
    // the result does not depend on the relative order of replace/install
    // calls within one component.
    collect_replacements(&entries, replacements)?;

    for entry in entries {
        match entry.kind {
            EntryKind::Lazy(lazy) => {
                let mut key = lazy.key();
                let mut to_install = lazy;
                let mut hops = 0usize;
                while let Some(replacement) = replacements.get(&key) {
                    hops += 1;
                    if hops > replacements.len() {
                        return Err(InjectError::ComponentReplacementInItself {
                            type_name: to_install.fun_name,
                        });
                    }
                    to_install = replacement.clone();
                    key = to_install.key();
                }
                if !seen.insert(key) {
                    continue;
                }
                let sub = to_install.invoke();
                if let Some(error) = sub.error {
                    return Err(error);
                }
                expand_list(sub.entries, seen, replacements, out)?;
            }
            EntryKind::Replaced(_) | EntryKind::Replacement(_) => {}
            _ => out.push(entry),
        }
    }
    Ok(())
}

// --- phase N3: dependency-graph assembly ------------------------------------

pub(crate) enum NormPayload {
    Instance {
        object: Arc<dyn Any + Send + Sync>,
        raw: *const (),
    },
    Create(CreateFn),
    CreateCompressed {
        via: crate::binding::CompressedFn,
        class: CreateFn,
    },
}

pub(crate) struct NormBinding {
    pub type_id: TypeId,
    pub payload: NormPayload,
    pub deps: Vec<DepRequest>,
    pub arena_bytes: usize,
    pub dedup: DedupKey,
}

pub(crate) enum MultiElemNorm {
    Instance {
        object: Arc<dyn Any + Send + Sync>,
        raw: *const (),
    },
    Create(MultiCreateFn),
}

pub(crate) struct MultiElemFold {
    pub elem: MultiElemNorm,
    pub deps: Vec<DepRequest>,
    pub dedup: DedupKey,
    pub arena_bytes: usize,
}

pub(crate) struct MultiNorm {
    pub key: TypeId,
    pub elems: Vec<MultiElemFold>,
    pub make_vec: MakeVecFn,
}

pub(crate) struct Folded {
    pub bindings: Vec<Option<NormBinding>>,
    pub index: HashMap<TypeId, usize>,
    pub candidates: Vec<(TypeId, TypeId, crate::binding::CompressedFn)>,
    pub multis: Vec<MultiNorm>,
    pub multi_index: HashMap<TypeId, usize>,
    pub exposed: Option<HashSet<TypeId>>,
    pub requirements: Vec<TypeId>,
    pub total_arena_bytes: usize,
    pub undo: HashMap<TypeId, CompressionUndo>,
}

pub(crate) fn fold_entries(flat: Vec<BindingEntry>) -> Result<Folded, InjectError> {
    let mut folded = Folded {
        bindings: Vec::new(),
        index: HashMap::new(),
        candidates: Vec::new(),
        multis: Vec::new(),
        multi_index: HashMap::new(),
        exposed: None,
        requirements: Vec::new(),
        total_arena_bytes: 0,
        undo: HashMap::new(),
    };
    let mut candidate_keys: HashSet<DedupKey> = HashSet::new();

    for entry in flat {
        let type_id = entry.type_id;
        match entry.kind {
            EntryKind::Instance { object, raw } => {
                let dedup = DedupKey::instance(raw);
                add_binding(
                    &mut folded,
                    NormBinding {
                        type_id,
                        payload: NormPayload::Instance { object, raw },
                        deps: vec![],
                        arena_bytes: 0,
                        dedup,
                    },
                )?;
            }
            EntryKind::Construct {
                create,
                deps,
                arena_bytes,
            } => {
                if deps.iter().any(|d| d.id == type_id) {
                    return Err(InjectError::SelfLoop {
                        type_name: type_id.name(),
                    });
                }
                let dedup = DedupKey::create(create);
                add_binding(
                    &mut folded,
                    NormBinding {
                        type_id,
                        payload: NormPayload::Create(create),
                        deps,
                        arena_bytes,
                        dedup,
                    },
                )?;
            }
            EntryKind::Compressed { class_id, via } => {
                let key = DedupKey::compressed(via, class_id);
                if candidate_keys.insert(key) {
                    folded.candidates.push((type_id, class_id, via));
                }
            }
            EntryKind::MultiInstance {
                object,
                raw,
                make_vec,
            } => {
                add_multi(
                    &mut folded,
                    type_id,
                    MultiElemNorm::Instance { object, raw },
                    vec![],
                    DedupKey::instance(raw),
                    make_vec,
                    0,
                );
            }
            EntryKind::MultiConstruct {
                create,
                deps,
                make_vec,
                arena_bytes,
            } => {
                add_multi(
                    &mut folded,
                    type_id,
                    MultiElemNorm::Create(create),
                    deps,
                    DedupKey::multi_create(create),
                    make_vec,
                    arena_bytes,
                );
            }
            EntryKind::Expose => {
                folded
                    .exposed
                    .get_or_insert_with(HashSet::new)
                    .insert(type_id);
            }
            EntryKind::Lazy(_) | EntryKind::Replaced(_) | EntryKind::Replacement(_) => {
                unreachable!("lazy entries are consumed during expansion")
            }
        }
    }

    // Requirement closure: everything depended upon but not provided.
    let mut requirements: Vec<TypeId> = Vec::new();
    let mut requirement_set: HashSet<TypeId> = HashSet::new();
    let all_deps = folded
        .bindings
        .iter()
        .flatten()
        .flat_map(|b| b.deps.iter())
        .chain(
            folded
                .multis
                .iter()
                .flat_map(|m| m.elems.iter().flat_map(|e| e.deps.iter())),
        );
    for dep in all_deps {
        if !folded.index.contains_key(&dep.id) && requirement_set.insert(dep.id) {
            requirements.push(dep.id);
        }
    }
    folded.requirements = requirements;
    Ok(folded)
}

fn add_binding(folded: &mut Folded, binding: NormBinding) -> Result<(), InjectError> {
    match folded.index.get(&binding.type_id) {
        Some(&i) => {
            let existing = folded.bindings[i].as_ref().expect("live binding");
            if existing.dedup == binding.dedup {
                debug!(type_name = binding.type_id.name(), "deduplicated binding");
                Ok(())
            } else {
                Err(InjectError::TypeAlreadyBound {
                    type_name: binding.type_id.name(),
                })
            }
        }
        None => {
            folded.total_arena_bytes += binding.arena_bytes;
            folded.index.insert(binding.type_id, folded.bindings.len());
            folded.bindings.push(Some(binding));
            Ok(())
        }
    }
}

fn add_multi(
    folded: &mut Folded,
    key: TypeId,
    elem: MultiElemNorm,
    deps: Vec<DepRequest>,
    dedup: DedupKey,
    make_vec: MakeVecFn,
    arena_bytes: usize,
) {
    let mi = *folded.multi_index.entry(key).or_insert_with(|| {
        folded.multis.push(MultiNorm {
            key,
            elems: Vec::new(),
            make_vec,
        });
        folded.multis.len() - 1
    });
    let multi = &mut folded.multis[mi];
    if multi.elems.iter().any(|e| e.dedup == dedup) {
        debug!(type_name = key.name(), "deduplicated multibinding");
        return;
    }
    folded.total_arena_bytes += arena_bytes;
    multi.elems.push(MultiElemFold {
        elem,
        deps,
        dedup,
        arena_bytes,
    });
}

pub(crate) fn check_cycles(folded: &Folded) -> Result<(), InjectError> {
    // Requirements resolve first: they are satisfied from outside this
    // component, so they cannot be part of a local cycle. Deferred
    // (provider) dependencies never count; that is the point of a provider.
    let mut resolved: HashSet<TypeId> = folded.requirements.iter().copied().collect();
    let mut left: HashMap<TypeId, Vec<TypeId>> = folded
        .bindings
        .iter()
        .flatten()
        .map(|b| {
            (
                b.type_id,
                b.deps
                    .iter()
                    .filter(|d| !d.deferred)
                    .map(|d| d.id)
                    .collect(),
            )
        })
        .collect();

    let mut current_len = left.len();
    loop {
        let ready: Vec<TypeId> = left
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| resolved.contains(d) || !left.contains_key(d)))
            .map(|(id, _)| *id)
            .collect();
        for id in ready {
            left.remove(&id);
            resolved.insert(id);
        }
        if left.is_empty() {
            return Ok(());
        }
        if left.len() == current_len {
            break;
        }
        current_len = left.len();
    }
    let type_names = join_names(left.keys().map(|id| id.name()));
    Err(InjectError::DependencyCycle { type_names })
}

// --- phase N4: binding compression ------------------------------------------

pub(crate) fn compress_bindings(folded: &mut Folded) {
    let Some(exposed) = folded.exposed.clone() else {
        // Without an explicit signature every provided type is reachable
        // from the outside, so nothing is safe to compress.
        return;
    };
    let candidates = std::mem::take(&mut folded.candidates);
    'candidates: for (iface, class, via) in candidates {
        let (Some(&iface_idx), Some(&class_idx)) =
            (folded.index.get(&iface), folded.index.get(&class))
        else {
            continue;
        };
        if exposed.contains(&class) {
            continue;
        }
        // The interface's live binding must still be the plain
        // interface-to-class binding this candidate was paired with.
        {
            let iface_binding = folded.bindings[iface_idx].as_ref().expect("live binding");
            let plain_interface = matches!(iface_binding.payload, NormPayload::Create(_))
                && iface_binding.deps.len() == 1
                && iface_binding.deps[0].id == class
                && !iface_binding.deps[0].deferred;
            if !plain_interface {
                continue;
            }
        }
        let (class_create, class_deps, class_dedup) = {
            let class_binding = folded.bindings[class_idx].as_ref().expect("live binding");
            match &class_binding.payload {
                NormPayload::Create(create) => (
                    *create,
                    class_binding.deps.clone(),
                    class_binding.dedup,
                ),
                // Instances and already-compressed nodes stay as they are.
                _ => continue,
            }
        };
        // The interface must be the only dependent, counting deferred
        // (provider) dependencies, which resolve by node lookup at runtime.
        for (i, binding) in folded.bindings.iter().enumerate() {
            let Some(binding) = binding else { continue };
            if i == iface_idx {
                continue;
            }
            if binding.deps.iter().any(|d| d.id == class) {
                continue 'candidates;
            }
        }
        for multi in &folded.multis {
            for elem in &multi.elems {
                if elem.deps.iter().any(|d| d.id == class) {
                    continue 'candidates;
                }
            }
        }

        let iface_create = {
            let iface_binding = folded.bindings[iface_idx].as_ref().expect("live binding");
            match iface_binding.payload {
                NormPayload::Create(create) => create,
                _ => unreachable!("checked above"),
            }
        };
        folded.undo.insert(
            class,
            CompressionUndo {
                interface: iface,
                iface_create,
                class_create,
                class_deps: class_deps.clone(),
                class_dedup,
            },
        );
        let iface_binding = folded.bindings[iface_idx].as_mut().expect("live binding");
        iface_binding.payload = NormPayload::CreateCompressed {
            via,
            class: class_create,
        };
        iface_binding.deps = class_deps;
        folded.bindings[class_idx] = None;
        folded.index.remove(&class);
        debug!(
            interface = iface.name(),
            class = class.name(),
            "compressed interface binding"
        );
    }
}

// --- phases N5 + N6: accounting happened during fold; emit the template -----

pub(crate) fn build_template(folded: Folded) -> NormalizedComponent {
    let mut keep_alive = Vec::new();
    let mut instance_cells: Vec<Box<InstanceCell>> = Vec::new();
    let mut nodes: Vec<TemplateNode> = Vec::new();
    let mut edges: Vec<NodeIndex> = Vec::new();
    let mut node_index: HashMap<TypeId, NodeIndex> = HashMap::new();

    let live: Vec<NormBinding> = folded.bindings.into_iter().flatten().collect();
    for binding in &live {
        node_index.insert(binding.type_id, nodes.len() as NodeIndex);
        nodes.push(TemplateNode {
            key: binding.type_id,
            edges: (0, 0),
            state: TemplateState::Missing,
            dedup: Some(binding.dedup),
        });
    }
    for requirement in &folded.requirements {
        node_index.insert(*requirement, nodes.len() as NodeIndex);
        nodes.push(TemplateNode {
            key: *requirement,
            edges: (0, 0),
            state: TemplateState::Missing,
            dedup: None,
        });
    }

    for (i, binding) in live.into_iter().enumerate() {
        let begin = edges.len() as u32;
        for dep in binding.deps.iter().filter(|d| !d.deferred) {
            edges.push(node_index[&dep.id]);
        }
        let end = edges.len() as u32;
        nodes[i].edges = (begin, end);
        nodes[i].state = match binding.payload {
            NormPayload::Instance { object, raw } => {
                let cell = InstanceCell::boxed(raw);
                let ptr = cell.ptr();
                instance_cells.push(cell);
                keep_alive.push(object);
                TemplateState::Instance(ptr)
            }
            NormPayload::Create(create) => TemplateState::Pending(CreateKind::Plain(create)),
            NormPayload::CreateCompressed { via, class } => {
                TemplateState::Pending(CreateKind::Compressed { via, class })
            }
        };
    }

    let multis = folded
        .multis
        .into_iter()
        .map(|multi| MultiTemplate {
            key: multi.key,
            make_vec: multi.make_vec,
            elems: multi
                .elems
                .into_iter()
                .map(|e| {
                    let template = match e.elem {
                        MultiElemNorm::Instance { object, raw } => {
                            let cell = InstanceCell::boxed(raw);
                            let ptr = cell.ptr();
                            instance_cells.push(cell);
                            keep_alive.push(object);
                            MultiElemTemplate::Instance { cell: ptr }
                        }
                        MultiElemNorm::Create(create) => MultiElemTemplate::Construct { create },
                    };
                    (template, e.dedup)
                })
                .collect(),
        })
        .collect();

    let map = SemistaticMap::new(
        node_index
            .iter()
            .map(|(id, index)| (*id, *index))
            .collect(),
    );

    debug!(
        nodes = nodes.len(),
        arena_bytes = folded.total_arena_bytes,
        "normalized component"
    );

    NormalizedComponent {
        map,
        nodes,
        edges,
        multis,
        total_arena_bytes: folded.total_arena_bytes,
        keep_alive,
        instance_cells,
        undo: folded.undo,
    }
}

// --- merge with an extra component (injector construction) ------------------

pub(crate) struct MergedParts {
    pub map: SemistaticMap<TypeId, NodeIndex>,
    pub nodes: Vec<Node>,
    pub edges: Vec<NodeIndex>,
    pub multis: Vec<MultiTemplate>,
    pub total_arena_bytes: usize,
    pub keep_alive: Vec<Arc<dyn Any + Send + Sync>>,
    pub instance_cells: Vec<Box<InstanceCell>>,
}

pub(crate) fn merge_extra(
    base: &NormalizedComponent,
    extra: Component,
) -> anyhow::Result<MergedParts> {
    if let Some(error) = extra.error {
        return Err(error.into());
    }
    let flat = expand_entries(extra.entries)?;
    let folded = fold_entries(flat)?;
    check_cycles(&folded)?;

    // Live copies of the base graph.
    let mut nodes: Vec<Node> = base
        .nodes
        .iter()
        .map(|t| Node {
            key: t.key,
            edges: t.edges,
            state: Cell::new(match t.state {
                TemplateState::Missing => NodeState::Missing,
                TemplateState::Pending(kind) => NodeState::Pending(kind),
                TemplateState::Instance(cell) => NodeState::Ready(cell),
            }),
        })
        .collect();
    let mut dedups: Vec<Option<DedupKey>> = base.nodes.iter().map(|t| t.dedup).collect();
    let mut edges: Vec<NodeIndex> = base.edges.clone();
    let mut appended: HashMap<TypeId, NodeIndex> = HashMap::new();
    let mut new_pairs: Vec<(TypeId, NodeIndex)> = Vec::new();
    let mut total_arena_bytes = base.total_arena_bytes;
    let mut keep_alive = Vec::new();
    let mut instance_cells = Vec::new();

    let lookup = |base: &NormalizedComponent,
                  appended: &HashMap<TypeId, NodeIndex>,
                  id: TypeId|
     -> Option<NodeIndex> { base.map.find(id).or_else(|| appended.get(&id).copied()) };

    // Roll compressions back where the extra component reaches into them.
    let mut undone: HashSet<TypeId> = HashSet::new();
    {
        let mut triggers: Vec<TypeId> = Vec::new();
        let extra_dep_ids = folded
            .bindings
            .iter()
            .flatten()
            .flat_map(|b| b.deps.iter().map(|d| d.id))
            .chain(
                folded
                    .multis
                    .iter()
                    .flat_map(|m| m.elems.iter().flat_map(|e| e.deps.iter().map(|d| d.id))),
            );
        for id in extra_dep_ids {
            if base.undo.contains_key(&id) {
                triggers.push(id);
            }
        }
        for binding in folded.bindings.iter().flatten() {
            if base.undo.contains_key(&binding.type_id) {
                triggers.push(binding.type_id);
            }
        }
        for class in triggers {
            if !undone.insert(class) {
                continue;
            }
            let undo = &base.undo[&class];
            debug!(
                interface = undo.interface.name(),
                class = class.name(),
                "undoing binding compression"
            );
            // Restore the class node.
            let class_index = nodes.len() as NodeIndex;
            let begin = edges.len() as u32;
            for dep in undo.class_deps.iter().filter(|d| !d.deferred) {
                let dep_index = lookup(base, &appended, dep.id)
                    .expect("compressed class dependencies are always part of the base graph");
                edges.push(dep_index);
            }
            let end = edges.len() as u32;
            nodes.push(Node {
                key: class,
                edges: (begin, end),
                state: Cell::new(NodeState::Pending(CreateKind::Plain(undo.class_create))),
            });
            dedups.push(Some(undo.class_dedup));
            appended.insert(class, class_index);
            new_pairs.push((class, class_index));
            // Restore the plain interface binding.
            let iface_index = lookup(base, &appended, undo.interface)
                .expect("compressed interface is always part of the base graph");
            let begin = edges.len() as u32;
            edges.push(class_index);
            let end = edges.len() as u32;
            let iface_node = &mut nodes[iface_index as usize];
            iface_node.edges = (begin, end);
            iface_node
                .state
                .set(NodeState::Pending(CreateKind::Plain(undo.iface_create)));
        }
    }

    // Splice the extra bindings in.
    let extra_bindings: Vec<NormBinding> = folded.bindings.into_iter().flatten().collect();
    let mut kept: Vec<(NodeIndex, NormBinding)> = Vec::new();
    for binding in extra_bindings {
        match lookup(base, &appended, binding.type_id) {
            Some(index) => {
                let node = &nodes[index as usize];
                let bound = !matches!(node.state.get(), NodeState::Missing);
                if bound {
                    if dedups[index as usize] == Some(binding.dedup) {
                        debug!(
                            type_name = binding.type_id.name(),
                            "deduplicated binding during merge"
                        );
                        continue;
                    }
                    return Err(InjectError::TypeAlreadyBound {
                        type_name: binding.type_id.name(),
                    }
                    .into());
                }
                dedups[index as usize] = Some(binding.dedup);
                kept.push((index, binding));
            }
            None => {
                let index = nodes.len() as NodeIndex;
                nodes.push(Node {
                    key: binding.type_id,
                    edges: (0, 0),
                    state: Cell::new(NodeState::Missing),
                });
                dedups.push(Some(binding.dedup));
                appended.insert(binding.type_id, index);
                new_pairs.push((binding.type_id, index));
                kept.push((index, binding));
            }
        }
    }

    // Fill states and edges for the kept extra bindings; create missing
    // nodes for any dependency neither side provides.
    for (index, binding) in kept {
        total_arena_bytes += binding.arena_bytes;
        let begin = edges.len() as u32;
        let mut resolved_edges = Vec::new();
        for dep in binding.deps.iter().filter(|d| !d.deferred) {
            let dep_index = match lookup(base, &appended, dep.id) {
                Some(dep_index) => dep_index,
                None => {
                    let dep_index = nodes.len() as NodeIndex;
                    nodes.push(Node {
                        key: dep.id,
                        edges: (0, 0),
                        state: Cell::new(NodeState::Missing),
                    });
                    dedups.push(None);
                    appended.insert(dep.id, dep_index);
                    new_pairs.push((dep.id, dep_index));
                    dep_index
                }
            };
            resolved_edges.push(dep_index);
        }
        edges.extend(resolved_edges);
        let end = edges.len() as u32;
        let node = &mut nodes[index as usize];
        node.edges = (begin, end);
        match binding.payload {
            NormPayload::Instance { object, raw } => {
                let cell = InstanceCell::boxed(raw);
                node.state.set(NodeState::Ready(cell.ptr()));
                instance_cells.push(cell);
                keep_alive.push(object);
            }
            NormPayload::Create(create) => {
                node.state
                    .set(NodeState::Pending(CreateKind::Plain(create)));
            }
            NormPayload::CreateCompressed { via, class } => {
                node.state
                    .set(NodeState::Pending(CreateKind::Compressed { via, class }));
            }
        }
    }

    // Deferred dependencies of the extra component also need nodes.
    for requirement in &folded.requirements {
        if lookup(base, &appended, *requirement).is_none() {
            let index = nodes.len() as NodeIndex;
            nodes.push(Node {
                key: *requirement,
                edges: (0, 0),
                state: Cell::new(NodeState::Missing),
            });
            dedups.push(None);
            appended.insert(*requirement, index);
            new_pairs.push((*requirement, index));
        }
    }

    // Merge multibindings: base elements first, then the extra ones.
    let mut multis: Vec<MultiTemplate> = base
        .multis
        .iter()
        .map(|m| MultiTemplate {
            key: m.key,
            elems: m.elems.clone(),
            make_vec: m.make_vec,
        })
        .collect();
    let mut multi_index: HashMap<TypeId, usize> =
        multis.iter().enumerate().map(|(i, m)| (m.key, i)).collect();
    for multi in folded.multis {
        let mi = *multi_index.entry(multi.key).or_insert_with(|| {
            multis.push(MultiTemplate {
                key: multi.key,
                elems: Vec::new(),
                make_vec: multi.make_vec,
            });
            multis.len() - 1
        });
        for e in multi.elems {
            if multis[mi].elems.iter().any(|(_, d)| *d == e.dedup) {
                continue;
            }
            total_arena_bytes += e.arena_bytes;
            let template = match e.elem {
                MultiElemNorm::Instance { object, raw } => {
                    let cell = InstanceCell::boxed(raw);
                    let ptr = cell.ptr();
                    instance_cells.push(cell);
                    keep_alive.push(object);
                    MultiElemTemplate::Instance { cell: ptr }
                }
                MultiElemNorm::Create(create) => MultiElemTemplate::Construct { create },
            };
            multis[mi].elems.push((template, e.dedup));
        }
    }

    // No type may be left unprovided once the extra component is merged.
    // Unfilled base requirements and dangling extra dependencies read
    // differently, so they get different errors.
    let mut unfilled_requirements: Vec<&str> = Vec::new();
    let mut missing: Vec<&str> = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        if matches!(node.state.get(), NodeState::Missing) {
            if i < base.nodes.len() {
                unfilled_requirements.push(node.key.name());
            } else {
                missing.push(node.key.name());
            }
        }
    }
    if !unfilled_requirements.is_empty() {
        return Err(InjectError::InjectorWithRequirements {
            type_names: join_names(unfilled_requirements.into_iter()),
        }
        .into());
    }
    if !missing.is_empty() {
        return Err(InjectError::NoBindingFound {
            details: format!("Missing injection values: {}", join_names(missing.into_iter())),
        }
        .into());
    }

    check_live_cycles(&nodes, &edges)?;

    let map = if new_pairs.is_empty() {
        base.map.clone()
    } else {
        base.map.extended(new_pairs)
    };

    Ok(MergedParts {
        map,
        nodes,
        edges,
        multis,
        total_arena_bytes,
        keep_alive,
        instance_cells,
    })
}

fn check_live_cycles(nodes: &[Node], edges: &[NodeIndex]) -> Result<(), InjectError> {
    let mut remaining: Vec<usize> = Vec::new();
    let mut unresolved: Vec<bool> = vec![false; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        if matches!(node.state.get(), NodeState::Pending(_)) {
            unresolved[i] = true;
            remaining.push(i);
        }
    }
    loop {
        let before = remaining.len();
        remaining.retain(|&i| {
            let (begin, end) = nodes[i].edges;
            let blocked = edges[begin as usize..end as usize]
                .iter()
                .any(|&dep| unresolved[dep as usize]);
            if !blocked {
                unresolved[i] = false;
            }
            blocked
        });
        if remaining.is_empty() {
            return Ok(());
        }
        if remaining.len() == before {
            let type_names = join_names(remaining.iter().map(|&i| nodes[i].key.name()));
            return Err(InjectError::DependencyCycle { type_names });
        }
    }
}
