//! Interning term factory.
//!
//! The factory owns all term storage. Interning is strict: structurally
//! identical input always returns the same [`TermId`], so handle equality is
//! structural equality and terms are safe to share everywhere. Allocation
//! accounting is incremental so callers can reason about a memory budget
//! without scanning.

use std::collections::HashMap;
use std::fmt;
use std::mem;

use crate::term::{Number, TermId, TermKind};

/// Interned name handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TermData {
    kind: TermKind,
    name: Symbol,
    args: Vec<TermId>,
}

#[derive(Debug)]
struct TermEntry {
    data: TermData,
    ground: bool,
}

/// Interns terms and tracks their allocation size.
///
/// The sticky out-of-memory latch never blocks allocation (failing an
/// allocation mid-search would leave callers with dangling work); once it is
/// set, callers must treat any in-flight result as partial and stop.
#[derive(Debug, Default)]
pub struct TermFactory {
    symbols: Vec<String>,
    symbol_ids: HashMap<String, Symbol>,
    terms: Vec<TermEntry>,
    term_ids: HashMap<TermData, TermId>,
    string_bytes: usize,
    other_bytes: usize,
    out_of_memory: bool,
}

impl TermFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern_symbol(&mut self, name: &str) -> Symbol {
        if let Some(sym) = self.symbol_ids.get(name) {
            return *sym;
        }
        let sym = Symbol(self.symbols.len() as u32);
        self.symbols.push(name.to_string());
        self.symbol_ids.insert(name.to_string(), sym);
        // Both copies of the name plus table overhead.
        self.string_bytes += 2 * name.len();
        self.other_bytes += 2 * mem::size_of::<String>() + mem::size_of::<Symbol>();
        sym
    }

    fn intern(&mut self, data: TermData, ground: bool) -> TermId {
        if let Some(id) = self.term_ids.get(&data) {
            return *id;
        }
        let id = TermId(self.terms.len() as u32);
        self.other_bytes += mem::size_of::<TermEntry>()
            + mem::size_of::<TermData>()
            + 2 * data.args.len() * mem::size_of::<TermId>()
            + mem::size_of::<TermId>();
        self.term_ids.insert(data.clone(), id);
        self.terms.push(TermEntry { data, ground });
        id
    }

    pub fn constant(&mut self, name: &str) -> TermId {
        let name = self.intern_symbol(name);
        self.intern(
            TermData {
                kind: TermKind::Constant,
                name,
                args: Vec::new(),
            },
            true,
        )
    }

    pub fn variable(&mut self, name: &str) -> TermId {
        let name = self.intern_symbol(name);
        self.intern(
            TermData {
                kind: TermKind::Variable,
                name,
                args: Vec::new(),
            },
            false,
        )
    }

    pub fn functor(&mut self, name: &str, args: &[TermId]) -> TermId {
        let name = self.intern_symbol(name);
        self.functor_from_symbol(name, args)
    }

    pub fn functor_from_symbol(&mut self, name: Symbol, args: &[TermId]) -> TermId {
        let ground = args.iter().all(|a| self.is_ground(*a));
        self.intern(
            TermData {
                kind: TermKind::Functor,
                name,
                args: args.to_vec(),
            },
            ground,
        )
    }

    pub fn int_constant(&mut self, value: i64) -> TermId {
        self.constant(&value.to_string())
    }

    pub fn float_constant(&mut self, value: f64) -> TermId {
        // Keep a decimal point so the name re-parses as a float.
        let name = if value.fract() == 0.0 && value.is_finite() {
            format!("{value:.1}")
        } else {
            format!("{value}")
        };
        self.constant(&name)
    }

    pub fn number_constant(&mut self, value: Number) -> TermId {
        match value {
            Number::Int(i) => self.int_constant(i),
            Number::Float(f) => self.float_constant(f),
        }
    }

    pub fn boolean_constant(&mut self, value: bool) -> TermId {
        self.constant(if value { "true" } else { "false" })
    }

    pub fn kind_of(&self, term: TermId) -> TermKind {
        self.terms[term.0 as usize].data.kind
    }

    pub fn name_of(&self, term: TermId) -> &str {
        self.symbol_name(self.terms[term.0 as usize].data.name)
    }

    pub fn args_of(&self, term: TermId) -> &[TermId] {
        &self.terms[term.0 as usize].data.args
    }

    pub fn arity_of(&self, term: TermId) -> usize {
        self.args_of(term).len()
    }

    pub fn symbol_of(&self, term: TermId) -> Symbol {
        self.terms[term.0 as usize].data.name
    }

    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        &self.symbols[symbol.0 as usize]
    }

    pub fn is_variable(&self, term: TermId) -> bool {
        self.kind_of(term) == TermKind::Variable
    }

    pub fn is_constant(&self, term: TermId) -> bool {
        self.kind_of(term) == TermKind::Constant
    }

    /// A ground term contains no variables. Computed once at intern time.
    pub fn is_ground(&self, term: TermId) -> bool {
        self.terms[term.0 as usize].ground
    }

    pub fn is_true_constant(&self, term: TermId) -> bool {
        self.is_constant(term) && self.name_of(term) == "true"
    }

    /// The numeric value of a constant whose name parses as an integer or a
    /// finite double.
    pub fn number(&self, term: TermId) -> Option<Number> {
        if self.kind_of(term) != TermKind::Constant {
            return None;
        }
        let name = self.name_of(term);
        if let Ok(i) = name.parse::<i64>() {
            return Some(Number::Int(i));
        }
        match name.parse::<f64>() {
            Ok(f) if f.is_finite() => Some(Number::Float(f)),
            _ => None,
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Total accounted allocation size in bytes.
    pub fn dynamic_size(&self) -> usize {
        self.string_bytes + self.other_bytes
    }

    /// Bytes held by interned name strings.
    pub fn string_size(&self) -> usize {
        self.string_bytes
    }

    /// Bytes held by term nodes and intern tables.
    pub fn other_allocation_size(&self) -> usize {
        self.other_bytes
    }

    pub fn out_of_memory(&self) -> bool {
        self.out_of_memory
    }

    /// Latch the out-of-memory flag. Setting `false` has no effect once the
    /// latch is set.
    pub fn set_out_of_memory(&mut self, value: bool) {
        self.out_of_memory |= value;
    }

    pub fn display(&self, term: TermId) -> TermDisplay<'_> {
        TermDisplay {
            factory: self,
            term,
        }
    }

    pub fn display_list<'a>(&'a self, terms: &'a [TermId]) -> TermListDisplay<'a> {
        TermListDisplay {
            factory: self,
            terms,
        }
    }

    pub fn term_to_string(&self, term: TermId) -> String {
        self.display(term).to_string()
    }
}

/// Renders a term in functional notation: `name`, `?var`, `name(a,b)`.
pub struct TermDisplay<'a> {
    factory: &'a TermFactory,
    term: TermId,
}

impl fmt::Display for TermDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let factory = self.factory;
        match factory.kind_of(self.term) {
            TermKind::Constant => write!(f, "{}", factory.name_of(self.term)),
            TermKind::Variable => write!(f, "?{}", factory.name_of(self.term)),
            TermKind::Functor => {
                write!(f, "{}(", factory.name_of(self.term))?;
                for (i, arg) in factory.args_of(self.term).iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", factory.display(*arg))?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Renders a term list joined by `", "`.
pub struct TermListDisplay<'a> {
    factory: &'a TermFactory,
    terms: &'a [TermId],
}

impl fmt::Display for TermListDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.factory.display(*term))?;
        }
        Ok(())
    }
}
