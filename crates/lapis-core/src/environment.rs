//! Lexical environments.
//!
//! Frames live in an arena owned by [`Environments`] and are addressed by
//! [`Env`] handles. Each handle holds one reference on its frame: child
//! frames hold their parent, closures hold their defining frame and the
//! interpreter holds the frame it is executing in. A frame is released when
//! its last handle is dropped.
//!
//! A function declared inside a call is stored in the frame it closes over,
//! so that frame holds a handle to itself and its count never reaches zero.
//! [`Environments::collect_cycles`] finds frames that are only reachable
//! from such cycles and clears them. It runs whenever the number of live
//! frames doubles and at the end of every program run.
//!
//! Dropping a value can drop a closure and therefore release a frame, which
//! needs the frame table. No value may be dropped while that table is
//! borrowed, so every mutation hands displaced values back out of the borrow
//! before they are dropped.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::ast::Visibility;
use crate::value::{ArrayRef, Class, DictionaryRef, Function, Instance, NativeFunction, Value};

/// Live frame count below which cycles are never collected.
const COLLECTION_THRESHOLD: usize = 1024;

/// A bound name.
#[derive(Clone)]
pub struct Binding {
    pub value: Value,
    pub visibility: Visibility,
}

struct Frame {
    bindings: FxHashMap<String, Binding>,
    parent: Option<Env>,
}

#[derive(Default)]
struct Arena {
    frames: RefCell<Vec<Option<Frame>>>,
    refs: RefCell<Vec<usize>>,
    free: RefCell<Vec<usize>>,
    live: Cell<usize>,
    next_collection: Cell<usize>,
}

impl Arena {
    fn alloc(&self, parent: Option<Env>) -> usize {
        let frame = Frame {
            bindings: FxHashMap::default(),
            parent,
        };
        let mut frames = self.frames.borrow_mut();
        let mut refs = self.refs.borrow_mut();
        self.live.set(self.live.get() + 1);
        match self.free.borrow_mut().pop() {
            Some(id) => {
                frames[id] = Some(frame);
                refs[id] = 1;
                id
            }
            None => {
                frames.push(Some(frame));
                refs.push(1);
                frames.len() - 1
            }
        }
    }

    fn retain(&self, id: usize) {
        self.refs.borrow_mut()[id] += 1;
    }

    fn release(&self, id: usize) {
        let remaining = {
            let mut refs = self.refs.borrow_mut();
            refs[id] -= 1;
            refs[id]
        };
        if remaining > 0 {
            return;
        }
        let frame = self.frames.borrow_mut()[id].take();
        self.free.borrow_mut().push(id);
        self.live.set(self.live.get() - 1);
        // bindings and the parent handle are dropped outside the borrow
        drop(frame);
    }
}

/// A counted handle to an environment frame.
pub struct Env {
    id: usize,
    arena: Weak<Arena>,
}

impl Env {
    fn id(&self) -> usize {
        self.id
    }
}

impl Clone for Env {
    fn clone(&self) -> Self {
        if let Some(arena) = self.arena.upgrade() {
            arena.retain(self.id);
        }
        Self {
            id: self.id,
            arena: self.arena.clone(),
        }
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.upgrade() {
            arena.release(self.id);
        }
    }
}

impl PartialEq for Env {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.arena.ptr_eq(&other.arena)
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Env({})", self.id)
    }
}

/// Owner of every environment frame of one interpreter.
#[derive(Default)]
pub struct Environments {
    arena: Rc<Arena>,
}

impl Environments {
    pub fn new() -> Self {
        let envs = Self::default();
        envs.arena.next_collection.set(COLLECTION_THRESHOLD);
        envs
    }

    fn handle(&self, id: usize) -> Env {
        Env {
            id,
            arena: Rc::downgrade(&self.arena),
        }
    }

    /// A frame with no parent.
    pub fn root(&self) -> Env {
        self.handle(self.arena.alloc(None))
    }

    /// A frame whose lookups fall back to `parent`.
    pub fn child(&self, parent: &Env) -> Env {
        if self.arena.live.get() >= self.arena.next_collection.get() {
            self.collect_cycles();
            let next = (self.arena.live.get() * 2).max(COLLECTION_THRESHOLD);
            self.arena.next_collection.set(next);
        }
        self.handle(self.arena.alloc(Some(parent.clone())))
    }

    /// Bind `name` in `env` itself, replacing any existing binding there.
    pub fn define(&self, env: &Env, name: &str, value: Value, visibility: Visibility) {
        let binding = Binding { value, visibility };
        let displaced = {
            let mut frames = self.arena.frames.borrow_mut();
            match frames.get_mut(env.id()).and_then(Option::as_mut) {
                Some(frame) => frame.bindings.insert(name.to_string(), binding),
                None => Some(binding),
            }
        };
        drop(displaced);
    }

    /// Look `name` up through the chain of frames.
    pub fn lookup(&self, env: &Env, name: &str) -> Option<Value> {
        let frames = self.arena.frames.borrow();
        let mut current = Some(env.id());
        while let Some(id) = current {
            let frame = frames.get(id)?.as_ref()?;
            if let Some(binding) = frame.bindings.get(name) {
                return Some(binding.value.clone());
            }
            current = frame.parent.as_ref().map(Env::id);
        }
        None
    }

    /// A binding of `env` itself, ignoring its parents.
    pub fn get_local(&self, env: &Env, name: &str) -> Option<Binding> {
        let frames = self.arena.frames.borrow();
        frames
            .get(env.id())?
            .as_ref()?
            .bindings
            .get(name)
            .cloned()
    }

    /// Every public binding of `env` itself, sorted by name.
    pub fn public_bindings(&self, env: &Env) -> Vec<(String, Value)> {
        let frames = self.arena.frames.borrow();
        let Some(frame) = frames.get(env.id()).and_then(Option::as_ref) else {
            return Vec::new();
        };
        let mut public: Vec<_> = frame
            .bindings
            .iter()
            .filter(|(_, binding)| binding.visibility == Visibility::Public)
            .map(|(name, binding)| (name.clone(), binding.value.clone()))
            .collect();
        public.sort_by(|a, b| a.0.cmp(&b.0));
        public
    }

    /// Overwrite the nearest existing binding of `name`. Returns `false` if
    /// the name is not bound anywhere in the chain.
    pub fn assign(&self, env: &Env, name: &str, value: Value) -> bool {
        let outcome = {
            let mut frames = self.arena.frames.borrow_mut();
            let mut current = Some(env.id());
            let mut owner = None;
            while let Some(id) = current {
                let Some(frame) = frames.get(id).and_then(Option::as_ref) else {
                    break;
                };
                if frame.bindings.contains_key(name) {
                    owner = Some(id);
                    break;
                }
                current = frame.parent.as_ref().map(Env::id);
            }
            let binding = owner
                .and_then(|id| frames[id].as_mut())
                .and_then(|frame| frame.bindings.get_mut(name));
            match binding {
                Some(binding) => Ok(std::mem::replace(&mut binding.value, value)),
                None => Err(value),
            }
        };
        outcome.is_ok()
    }

    /// Number of frames currently alive.
    pub fn live_frames(&self) -> usize {
        self.arena.live.get()
    }

    /// Clear every frame that is kept alive only by reference cycles,
    /// returning how many were cleared.
    ///
    /// A frame or shared value with more handles than the graph itself
    /// accounts for is held from outside (the interpreter, a Rust local, the
    /// host) and is a root. Frames not reachable from a root lose their
    /// bindings and parent, which breaks the cycles so the ordinary counts
    /// release them. Nothing is collected while a container is mutably
    /// borrowed.
    pub fn collect_cycles(&self) -> usize {
        let Some(mut graph) = self.scan() else {
            return 0;
        };
        let garbage = graph.unreachable_frames();
        let mut debris = Vec::with_capacity(garbage.len());
        {
            let mut frames = self.arena.frames.borrow_mut();
            for &id in &garbage {
                if let Some(frame) = frames.get_mut(id).and_then(Option::as_mut) {
                    debris.push((std::mem::take(&mut frame.bindings), frame.parent.take()));
                }
            }
        }
        graph.shared.clear();
        drop(debris);
        if !garbage.is_empty() {
            debug!(cleared = garbage.len(), live = self.live_frames(), "collected frame cycles");
        }
        garbage.len()
    }

    fn scan(&self) -> Option<Graph> {
        let frames = self.arena.frames.try_borrow().ok()?;
        let refs = self.arena.refs.try_borrow().ok()?;
        let mut graph = Graph::new(Rc::as_ptr(&self.arena));
        for (id, frame) in frames.iter().enumerate() {
            let Some(frame) = frame else { continue };
            let node = Node::Frame(id);
            graph.frames.push((id, refs[id]));
            if let Some(parent) = &frame.parent {
                graph.env_edge(node, parent);
            }
            for binding in frame.bindings.values() {
                graph.value_edge(node, &binding.value);
            }
        }
        while let Some(shared) = graph.pending.pop() {
            graph.scan_shared(&shared)?;
        }
        Some(graph)
    }
}

/// A vertex of the reference graph: a frame or a shared heap value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Frame(usize),
    Shared(*const ()),
}

/// A shared value found while scanning. The graph keeps exactly one clone
/// of each, which is discounted from its strong count.
#[derive(Clone)]
enum Shared {
    Function(Rc<Function>),
    Array(ArrayRef),
    Dictionary(DictionaryRef),
    Instance(Rc<Instance>),
    Class(Rc<Class>),
    Native(Rc<NativeFunction>),
}

impl Shared {
    fn of(value: &Value) -> Option<Shared> {
        match value {
            Value::Function(f) => Some(Shared::Function(f.clone())),
            Value::Array(a) => Some(Shared::Array(a.clone())),
            Value::Dictionary(d) => Some(Shared::Dictionary(d.clone())),
            Value::Instance(i) => Some(Shared::Instance(i.clone())),
            Value::Class(c) => Some(Shared::Class(c.clone())),
            Value::Native(n) => Some(Shared::Native(n.clone())),
            _ => None,
        }
    }

    fn ptr(&self) -> *const () {
        match self {
            Shared::Function(rc) => Rc::as_ptr(rc) as *const (),
            Shared::Array(rc) => Rc::as_ptr(rc) as *const (),
            Shared::Dictionary(rc) => Rc::as_ptr(rc) as *const (),
            Shared::Instance(rc) => Rc::as_ptr(rc) as *const (),
            Shared::Class(rc) => Rc::as_ptr(rc) as *const (),
            Shared::Native(rc) => Rc::as_ptr(rc) as *const (),
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Shared::Function(rc) => Rc::strong_count(rc),
            Shared::Array(rc) => Rc::strong_count(rc),
            Shared::Dictionary(rc) => Rc::strong_count(rc),
            Shared::Instance(rc) => Rc::strong_count(rc),
            Shared::Class(rc) => Rc::strong_count(rc),
            Shared::Native(rc) => Rc::strong_count(rc),
        }
    }
}

struct Graph {
    arena: *const Arena,
    /// Live frames with their handle counts
    frames: Vec<(usize, usize)>,
    shared: FxHashMap<*const (), Shared>,
    pending: Vec<Shared>,
    edges: FxHashMap<Node, Vec<Node>>,
    /// Handles to each node held inside the graph
    internal: FxHashMap<Node, usize>,
}

impl Graph {
    fn new(arena: *const Arena) -> Self {
        Self {
            arena,
            frames: Vec::new(),
            shared: FxHashMap::default(),
            pending: Vec::new(),
            edges: FxHashMap::default(),
            internal: FxHashMap::default(),
        }
    }

    fn edge(&mut self, from: Node, to: Node) {
        self.edges.entry(from).or_default().push(to);
        *self.internal.entry(to).or_default() += 1;
    }

    fn env_edge(&mut self, from: Node, env: &Env) {
        // handles into another interpreter's arena are not ours to count
        if std::ptr::eq(env.arena.as_ptr(), self.arena) {
            self.edge(from, Node::Frame(env.id()));
        }
    }

    fn shared_edge(&mut self, from: Node, shared: Shared) {
        let ptr = shared.ptr();
        self.edge(from, Node::Shared(ptr));
        if !self.shared.contains_key(&ptr) {
            self.pending.push(shared.clone());
            self.shared.insert(ptr, shared);
        }
    }

    fn value_edge(&mut self, from: Node, value: &Value) {
        if let Some(shared) = Shared::of(value) {
            self.shared_edge(from, shared);
        }
    }

    /// Record the outgoing edges of `shared`. `None` if a container is
    /// mutably borrowed.
    fn scan_shared(&mut self, shared: &Shared) -> Option<()> {
        let node = Node::Shared(shared.ptr());
        match shared {
            Shared::Function(function) => self.env_edge(node, &function.closure),
            Shared::Array(items) => {
                for item in items.try_borrow().ok()?.iter() {
                    self.value_edge(node, item);
                }
            }
            Shared::Dictionary(dict) => {
                for value in dict.try_borrow().ok()?.values() {
                    self.value_edge(node, value);
                }
            }
            Shared::Instance(instance) => {
                self.shared_edge(node, Shared::Class(instance.class.clone()));
                for value in instance.fields.try_borrow().ok()?.values() {
                    self.value_edge(node, value);
                }
            }
            Shared::Class(class) => {
                for method in class.methods.values() {
                    self.shared_edge(node, Shared::Function(method.clone()));
                }
            }
            Shared::Native(native) => {
                if let NativeFunction::Method { receiver, .. } = native.as_ref() {
                    self.value_edge(node, receiver);
                }
            }
        }
        Some(())
    }

    /// Frames that no externally held node can reach.
    fn unreachable_frames(&self) -> Vec<usize> {
        let internal = |node: &Node| self.internal.get(node).copied().unwrap_or(0);
        let mut roots: Vec<Node> = self
            .frames
            .iter()
            .map(|&(id, refs)| (Node::Frame(id), refs))
            .filter(|(node, refs)| *refs > internal(node))
            .map(|(node, _)| node)
            .collect();
        roots.extend(
            self.shared
                .iter()
                .map(|(&ptr, shared)| (Node::Shared(ptr), shared.strong_count() - 1))
                .filter(|(node, count)| *count > internal(node))
                .map(|(node, _)| node),
        );

        let mut reached = FxHashSet::default();
        while let Some(node) = roots.pop() {
            if !reached.insert(node) {
                continue;
            }
            if let Some(targets) = self.edges.get(&node) {
                roots.extend(targets.iter().copied());
            }
        }
        self.frames
            .iter()
            .map(|&(id, _)| id)
            .filter(|id| !reached.contains(&Node::Frame(*id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_parents() {
        let envs = Environments::new();
        let root = envs.root();
        envs.define(&root, "x", Value::Number(1.0), Visibility::Private);
        let child = envs.child(&root);
        envs.define(&child, "y", Value::Number(2.0), Visibility::Private);

        assert_eq!(envs.lookup(&child, "x"), Some(Value::Number(1.0)));
        assert_eq!(envs.lookup(&child, "y"), Some(Value::Number(2.0)));
        assert_eq!(envs.lookup(&root, "y"), None);
    }

    #[test]
    fn test_shadowing_and_assignment() {
        let envs = Environments::new();
        let root = envs.root();
        envs.define(&root, "x", Value::Number(1.0), Visibility::Private);
        let child = envs.child(&root);

        assert!(envs.assign(&child, "x", Value::Number(5.0)));
        assert_eq!(envs.lookup(&root, "x"), Some(Value::Number(5.0)));

        envs.define(&child, "x", Value::Number(9.0), Visibility::Private);
        assert!(envs.assign(&child, "x", Value::Number(10.0)));
        assert_eq!(envs.lookup(&child, "x"), Some(Value::Number(10.0)));
        assert_eq!(envs.lookup(&root, "x"), Some(Value::Number(5.0)));

        assert!(!envs.assign(&child, "missing", Value::Null));
    }

    #[test]
    fn test_frames_are_released_with_their_last_handle() {
        let envs = Environments::new();
        let root = envs.root();
        assert_eq!(envs.live_frames(), 1);

        let child = envs.child(&root);
        let grandchild = envs.child(&child);
        assert_eq!(envs.live_frames(), 3);

        drop(child);
        // still referenced as the grandchild's parent
        assert_eq!(envs.live_frames(), 3);
        drop(grandchild);
        assert_eq!(envs.live_frames(), 1);

        let reused = envs.child(&root);
        assert_eq!(envs.live_frames(), 2);
        drop(reused);
        drop(root);
        assert_eq!(envs.live_frames(), 0);
    }

    #[test]
    fn test_handles_outliving_the_arena_are_inert() {
        let envs = Environments::new();
        let root = envs.root();
        let copy = root.clone();
        drop(envs);
        drop(root);
        drop(copy);
    }

    #[test]
    fn test_public_bindings() {
        let envs = Environments::new();
        let root = envs.root();
        envs.define(&root, "b", Value::Number(2.0), Visibility::Public);
        envs.define(&root, "hidden", Value::Null, Visibility::Private);
        envs.define(&root, "a", Value::Number(1.0), Visibility::Public);
        let names: Vec<_> = envs
            .public_bindings(&root)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let hidden = envs.get_local(&root, "hidden").unwrap();
        assert_eq!(hidden.visibility, Visibility::Private);
    }
}
