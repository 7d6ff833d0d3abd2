// crates/testbed-core/src/context.rs
// ============================================================================
// Module: Execution Context Stack
// Description: Hierarchical per-scope state with read-through inheritance.
// Purpose: Carry setup artifacts through nested suite, test, and worker scopes.
// Dependencies: thiserror, tracing
// ============================================================================

//! ## Overview
//! A [`Context`] is a node in the per-scope state tree. It owns its own
//! bindings and resolves lookups by falling through to its parent. A
//! [`ContextStack`] is an explicit value owned by one logical thread of
//! control; it is threaded through call signatures instead of living in
//! thread-local storage, so a worker can only reach the stack it was handed.
//!
//! Invariants:
//! - Push/pop is balanced per stack. Scopes opened with
//!   [`ContextStack::enter_child`] pop when the guard drops, including during
//!   unwinding.
//! - A child never mutates its parent's bindings; lookups read through.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use thiserror::Error;
use tracing::warn;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Context stack misuse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// `pop` was called with no context pushed.
    #[error("context stack is empty; nothing to pop")]
    EmptyStack,
    /// `current` was called before any context was pushed.
    #[error("no context has been pushed on this stack")]
    NoContext,
}

// ============================================================================
// SECTION: State Keys
// ============================================================================

/// Typed key identifying a binding inside a [`Context`].
///
/// # Invariants
/// - Two keys are equal only when both the Rust type and the optional name
///   match.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    /// Type identifier of the bound value.
    type_id: TypeId,
    /// Optional semantic name distinguishing values of the same type.
    name: Option<String>,
    /// Type name retained for diagnostics.
    type_name: &'static str,
}

impl StateKey {
    /// Returns the unnamed key for values of type `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: None,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns the key for values of type `T` bound under `name`.
    #[must_use]
    pub fn named<T: Any>(name: impl Into<String>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: Some(name.into()),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns the semantic name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the Rust type name of the bound value.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true when the key binds values of type `T`.
    #[must_use]
    pub fn is_type<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}[{name}]", self.type_name),
            None => f.write_str(self.type_name),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// SECTION: Bound State
// ============================================================================

/// A value bound into a context under a [`StateKey`].
#[derive(Clone)]
pub struct BoundState {
    /// Key the value is bound under.
    key: StateKey,
    /// Shared, type-erased value.
    value: Arc<dyn Any + Send + Sync>,
}

impl BoundState {
    /// Wraps `value` under its unnamed type key.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            key: StateKey::of::<T>(),
            value: Arc::new(value),
        }
    }

    /// Wraps `value` under its type key with a semantic name.
    #[must_use]
    pub fn named<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        Self {
            key: StateKey::named::<T>(name),
            value: Arc::new(value),
        }
    }

    /// Returns the binding key.
    #[must_use]
    pub const fn key(&self) -> &StateKey {
        &self.key
    }

    /// Returns the value when it has type `T`.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for BoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundState").field("key", &self.key).finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// A node in the hierarchical per-scope state tree.
pub struct Context {
    /// Parent context, `None` for the root.
    parent: Option<Arc<Context>>,
    /// Distance from the root context.
    depth: usize,
    /// Bindings owned by this context.
    bindings: RwLock<BTreeMap<StateKey, BoundState>>,
}

impl Context {
    /// Creates a new root context with no bindings.
    #[must_use]
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            depth: 0,
            bindings: RwLock::new(BTreeMap::new()),
        })
    }

    /// Creates an empty child whose lookups fall through to `self`.
    #[must_use]
    pub fn create_child_context(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            depth: self.depth + 1,
            bindings: RwLock::new(BTreeMap::new()),
        })
    }

    /// Returns the parent context.
    #[must_use]
    pub const fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Returns the distance from the root context.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Binds `value` under its unnamed type key, returning the replaced
    /// binding of this context (parents are never touched).
    pub fn bind<T: Any + Send + Sync>(&self, value: T) -> Option<BoundState> {
        self.bind_state(BoundState::new(value))
    }

    /// Binds `value` under its type key and `name`.
    pub fn bind_named<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        value: T,
    ) -> Option<BoundState> {
        self.bind_state(BoundState::named(name, value))
    }

    /// Binds a prepared state, returning the replaced binding of this context.
    pub fn bind_state(&self, state: BoundState) -> Option<BoundState> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.insert(state.key.clone(), state)
    }

    /// Removes a binding owned by this context.
    pub fn unbind(&self, key: &StateKey) -> Option<BoundState> {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.remove(key)
    }

    /// Returns true when this context itself owns a binding for `key`.
    #[must_use]
    pub fn contains_own(&self, key: &StateKey) -> bool {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.contains_key(key)
    }

    /// Resolves `key` here first, then through the parent chain.
    #[must_use]
    pub fn lookup(&self, key: &StateKey) -> Option<BoundState> {
        let mut node = Some(self);
        while let Some(context) = node {
            let found = {
                let bindings = context.bindings.read().unwrap_or_else(PoisonError::into_inner);
                bindings.get(key).cloned()
            };
            if found.is_some() {
                return found;
            }
            node = context.parent.as_deref();
        }
        None
    }

    /// Returns the nearest unnamed binding of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.lookup(&StateKey::of::<T>()).and_then(|state| state.downcast::<T>())
    }

    /// Returns the nearest binding of type `T` under `name`.
    #[must_use]
    pub fn get_named<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.lookup(&StateKey::named::<T>(name)).and_then(|state| state.downcast::<T>())
    }

    /// Returns every visible binding of type `T`, keyed by name. Bindings in
    /// nearer contexts shadow those of their ancestors.
    #[must_use]
    pub fn visible<T: Any + Send + Sync>(&self) -> BTreeMap<Option<String>, Arc<T>> {
        let mut visible = BTreeMap::new();
        let mut node = Some(self);
        while let Some(context) = node {
            let bindings = context.bindings.read().unwrap_or_else(PoisonError::into_inner);
            for (key, state) in bindings.iter().filter(|(key, _)| key.is_type::<T>()) {
                if visible.contains_key(&key.name) {
                    continue;
                }
                if let Some(value) = state.downcast::<T>() {
                    visible.insert(key.name.clone(), value);
                }
            }
            drop(bindings);
            node = context.parent.as_deref();
        }
        visible
    }

    /// Returns the keys bound directly in this context.
    #[must_use]
    pub fn own_keys(&self) -> Vec<StateKey> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.keys().cloned().collect()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("depth", &self.depth)
            .field("keys", &self.own_keys())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Context Stack
// ============================================================================

/// Stack of nested contexts owned by one logical thread of control.
#[derive(Debug, Default)]
pub struct ContextStack {
    /// Pushed contexts, innermost last.
    frames: Vec<Arc<Context>>,
}

impl ContextStack {
    /// Creates an empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames: Vec::new(),
        }
    }

    /// Creates a stack with `context` already pushed.
    #[must_use]
    pub fn with_root(context: Arc<Context>) -> Self {
        Self {
            frames: vec![context],
        }
    }

    /// Pushes `context`, making it current.
    pub fn push(&mut self, context: Arc<Context>) {
        self.frames.push(context);
    }

    /// Pops and returns the current context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::EmptyStack`] when nothing is pushed.
    pub fn pop(&mut self) -> Result<Arc<Context>, ContextError> {
        self.frames.pop().ok_or(ContextError::EmptyStack)
    }

    /// Returns the current (innermost) context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoContext`] when nothing is pushed.
    pub fn current(&self) -> Result<&Arc<Context>, ContextError> {
        self.frames.last().ok_or(ContextError::NoContext)
    }

    /// Returns the number of pushed contexts.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns true when nothing is pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Pushes a child of the current context and returns a guard that pops it
    /// on drop.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoContext`] when nothing is pushed.
    pub fn enter_child(&mut self) -> Result<ChildScope<'_>, ContextError> {
        let child = self.current()?.create_child_context();
        let entry_depth = self.frames.len();
        self.frames.push(child);
        Ok(ChildScope {
            stack: self,
            entry_depth,
        })
    }

    /// Runs `body` inside a fresh child of the current context. The child is
    /// popped on every exit path, including panics unwinding out of `body`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoContext`] when nothing is pushed.
    pub fn run_with_child_context<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, ContextError> {
        let mut scope = self.enter_child()?;
        Ok(body(&mut *scope))
    }
}

// ============================================================================
// SECTION: Child Scope Guard
// ============================================================================

/// Guard for a child context pushed by [`ContextStack::enter_child`].
///
/// # Invariants
/// - Dropping the guard restores the stack to its depth before the push.
pub struct ChildScope<'a> {
    /// Stack the child was pushed on.
    stack: &'a mut ContextStack,
    /// Stack depth before the child was pushed.
    entry_depth: usize,
}

impl Deref for ChildScope<'_> {
    type Target = ContextStack;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl DerefMut for ChildScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl Drop for ChildScope<'_> {
    fn drop(&mut self) {
        let depth = self.stack.frames.len();
        if depth != self.entry_depth + 1 {
            warn!(
                expected = self.entry_depth + 1,
                actual = depth,
                "unbalanced context scope; restoring stack depth"
            );
        }
        self.stack.frames.truncate(self.entry_depth);
    }
}
