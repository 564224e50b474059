//! 符号与作用域
//!
//! Scopes live in an arena owned by [`SymbolTable`]; a scope only knows its
//! parent, so lookups walk outward along the chain.

use super::Type;
use crate::util::diagnostic::{Diagnostic, ErrorKind, Stage};
use crate::util::span::SourceLocation;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 作用域标识（arena 下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(usize);

impl ScopeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 符号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub scope: ScopeId,
    pub location: SourceLocation,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("`{0}` is not a valid identifier")]
    InvalidName(String),
    #[error("`{name}` is already defined in this scope (at {previous})")]
    Duplicate {
        name: String,
        previous: SourceLocation,
    },
}

impl SymbolError {
    pub fn into_diagnostic(
        self,
        stage: Stage,
        location: &SourceLocation,
    ) -> Diagnostic {
        match self {
            SymbolError::InvalidName(ref name) => Diagnostic::new(
                stage,
                ErrorKind::UnsupportedOperation,
                location.clone(),
                self.to_string(),
            )
            .with_offending(name.clone()),
            SymbolError::Duplicate {
                ref name,
                ref previous,
            } => Diagnostic::new(
                stage,
                ErrorKind::DuplicateDefinition,
                location.clone(),
                self.to_string(),
            )
            .with_offending(name.clone())
            .with_related(previous.clone()),
        }
    }
}

/// Identifier rule: XID start (or `_`) followed by XID continue characters
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || unicode_ident::is_xid_start(first) => {
            chars.all(unicode_ident::is_xid_continue)
        }
        _ => false,
    }
}

/// 构造符号
pub fn make_symbol(
    name: &str,
    ty: Type,
    scope: ScopeId,
    location: SourceLocation,
) -> Result<Symbol, SymbolError> {
    if !is_identifier(name) {
        return Err(SymbolError::InvalidName(name.to_string()));
    }
    Ok(Symbol {
        name: name.to_string(),
        ty,
        scope,
        location,
    })
}

#[derive(Debug, Clone, Default)]
struct Scope {
    parent: Option<ScopeId>,
    symbols: IndexMap<String, Symbol>,
}

/// 符号表
#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// 创建只含根作用域的符号表
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// 创建子作用域
    pub fn child(
        &mut self,
        parent: ScopeId,
    ) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            symbols: IndexMap::new(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub fn parent(
        &self,
        scope: ScopeId,
    ) -> Option<ScopeId> {
        self.scopes.get(scope.0).and_then(|s| s.parent)
    }

    /// Define `symbol` in its own scope; names are unique per scope
    pub fn define(
        &mut self,
        symbol: Symbol,
    ) -> Result<(), SymbolError> {
        let scope = &mut self.scopes[symbol.scope.0];
        if let Some(previous) = scope.symbols.get(&symbol.name) {
            return Err(SymbolError::Duplicate {
                name: symbol.name.clone(),
                previous: previous.location.clone(),
            });
        }
        scope.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    /// 查找符号（从内层作用域开始）
    pub fn lookup(
        &self,
        scope: ScopeId,
        name: &str,
    ) -> Option<&Symbol> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol);
            }
            current = scope.parent;
        }
        None
    }

    /// 仅在当前作用域查找
    pub fn lookup_local(
        &self,
        scope: ScopeId,
        name: &str,
    ) -> Option<&Symbol> {
        self.scopes.get(scope.0).and_then(|s| s.symbols.get(name))
    }

    /// Symbols of one scope in definition order
    pub fn symbols(
        &self,
        scope: ScopeId,
    ) -> impl Iterator<Item = &Symbol> {
        self.scopes
            .get(scope.0)
            .into_iter()
            .flat_map(|s| s.symbols.values())
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}
