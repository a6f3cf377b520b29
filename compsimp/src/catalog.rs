//! The case catalog.
//!
//! The catalog is a CSV table with one row per dangerous-value scenario:
//!
//! ```text
//! instruction,n_operands,other_srcs,dests,cs_operand,cs_value,cs_safe_value,cs_solutions
//! ADD64rr,2,,0,1,0,1,op:0
//! MUL64r,1,rax,"rax,rdx",0,0,1,"const:0,const:0"
//! ```
//!
//! Rows are validated and their tokens parsed when the catalog is built.
//! Operand-dependent resolution happens in [CaseCatalog::load].
//!
//! Case triggers
//! =============
//!
//! Two rows for the same instruction which compare the same `cs_operand`
//! against the same `cs_value` are rejected ([CsError::DuplicateCase]).
//! Rows comparing *different* operands may trigger at the same time; the
//! synthesized transform then applies the correction of the earliest row
//! last, so catalog authors must make sure the solutions of such rows agree.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::asm::Reg;
use crate::case::{ CompSimpCase, Operand, parse_imm };
use crate::error::{ CsError, CsResult, ReferenceError };
use crate::reference::RefToken;

/// One row of the catalog, as it appears in the file.
#[derive(Debug, Deserialize)]
struct RawRow {
    instruction: String,
    n_operands: String,
    other_srcs: String,
    dests: String,
    cs_operand: String,
    cs_value: String,
    cs_safe_value: String,
    cs_solutions: String,
}

/// One validated row of the catalog.
#[derive(Clone, Debug)]
struct CatalogEntry {
    row: usize,
    operand_count: usize,
    other_sources: Vec<Reg>,
    dests: Vec<RefToken>,
    cs_operand: RefToken,
    cs_value: i64,
    cs_safe_value: i64,
    solutions: Vec<RefToken>,
}

/// Split a comma-separated cell (the empty string is the empty list).
fn split_list(cell: &str) -> Vec<&str> {
    let cell = cell.trim();
    if cell.is_empty() {
        Vec::new()
    } else {
        cell.split(',').map(str::trim).collect()
    }
}

impl CatalogEntry {
    fn parse(row: usize, raw: &RawRow) -> CsResult<Self> {
        let malformed = |column: &'static str, reason: String| {
            CsError::MalformedRow {
                mnemonic: raw.instruction.clone(), row, column, reason,
            }
        };
        let reference = |source: ReferenceError| CsError::Reference {
            mnemonic: raw.instruction.clone(), row, source,
        };

        let operand_count = raw.n_operands.trim().parse::<usize>()
            .map_err(|e| malformed("n_operands", e.to_string()))?;

        let other_sources = split_list(&raw.other_srcs).into_iter()
            .map(|s| s.parse::<Reg>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(reference)?;

        let dests = split_list(&raw.dests).into_iter()
            .map(RefToken::parse_location)
            .collect::<Result<Vec<_>, _>>()
            .map_err(reference)?;

        let cs_operand = RefToken::parse_location(&raw.cs_operand)
            .map_err(reference)?;

        let cs_value = parse_imm(&raw.cs_value).ok_or_else(|| {
            malformed("cs_value", format!("'{}' is not an integer", raw.cs_value))
        })?;
        let cs_safe_value = parse_imm(&raw.cs_safe_value).ok_or_else(|| {
            malformed("cs_safe_value",
                format!("'{}' is not an integer", raw.cs_safe_value))
        })?;

        let solutions = split_list(&raw.cs_solutions).into_iter()
            .map(RefToken::parse_solution)
            .collect::<Result<Vec<_>, _>>()
            .map_err(reference)?;

        if solutions.len() != dests.len() {
            return Err(malformed("cs_solutions", format!(
                "{} solution(s) for {} destination(s)",
                solutions.len(), dests.len()
            )));
        }

        Ok(Self {
            row,
            operand_count,
            other_sources,
            dests,
            cs_operand,
            cs_value,
            cs_safe_value,
            solutions,
        })
    }

    /// Resolve this entry against the operands of an instruction instance.
    fn resolve(&self, mnemonic: &str, operands: &[Operand])
        -> CsResult<CompSimpCase>
    {
        if self.operand_count != operands.len() {
            return Err(CsError::ArityMismatch {
                mnemonic: mnemonic.to_string(),
                row: self.row,
                expected: self.operand_count,
                found: operands.len(),
            });
        }
        let reference = |source: ReferenceError| CsError::Reference {
            mnemonic: mnemonic.to_string(), row: self.row, source,
        };

        let destinations = self.dests.iter()
            .map(|t| t.resolve_reg(operands))
            .collect::<Result<Vec<_>, _>>()
            .map_err(reference)?;
        let cs_operand = self.cs_operand.resolve_reg(operands)
            .map_err(reference)?;
        let solutions = self.solutions.iter()
            .map(|t| t.resolve_solution(
                self.operand_count, self.other_sources.len()
            ))
            .collect::<Result<Vec<_>, _>>()
            .map_err(reference)?;

        Ok(CompSimpCase {
            mnemonic: mnemonic.to_string(),
            row: self.row,
            operand_count: self.operand_count,
            other_sources: self.other_sources.clone(),
            destinations,
            cs_operand,
            cs_value: self.cs_value,
            cs_safe_value: self.cs_safe_value,
            solutions,
        })
    }
}

/// Mapping from instruction mnemonic to its ordered list of cases.
///
/// Two rows of one instruction with the same trigger operand token and
/// value are rejected as duplicates. The check compares tokens as written,
/// so `0` and `rbx` naming the same operand are not caught here.
///
/// Built once and never mutated afterwards, so a catalog can be shared
/// freely between threads.
#[derive(Clone, Debug, Default)]
pub struct CaseCatalog {
    entries: HashMap<String, Vec<CatalogEntry>>,
    rows: usize,
}

impl CaseCatalog {
    /// Default location of the catalog.
    pub const DEFAULT_PATH: &'static str = "cmov_transform_cases.csv";

    pub fn from_path(path: impl AsRef<Path>) -> CsResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| CsError::Io {
            path: path.to_path_buf(), source
        })?;
        let res = Self::from_reader(file)?;
        debug!("loaded {} case(s) for {} instruction(s) from {}",
            res.len(), res.entries.len(), path.display());
        Ok(res)
    }

    pub fn from_csv_str(s: &str) -> CsResult<Self> {
        Self::from_reader(s.as_bytes())
    }

    pub fn from_reader<R: Read>(rdr: R) -> CsResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(rdr);
        let headers = reader.headers()?.clone();

        let mut res = Self::default();
        // (operand token, value) -> row, per instruction
        let mut triggers: HashMap<(String, RefToken, i64), usize> = HashMap::new();

        for record in reader.records() {
            let record = record?;
            let row = record.position().map(|p| p.line() as usize).unwrap_or(0);
            let raw: RawRow = record.deserialize(Some(&headers))?;
            let entry = CatalogEntry::parse(row, &raw)?;

            let key = (raw.instruction.clone(), entry.cs_operand.clone(), entry.cs_value);
            if let Some(first) = triggers.insert(key, row) {
                return Err(CsError::DuplicateCase {
                    mnemonic: raw.instruction,
                    first,
                    second: row,
                    operand: entry.cs_operand.to_string(),
                    value: entry.cs_value,
                });
            }

            res.entries.entry(raw.instruction).or_default().push(entry);
            res.rows += 1;
        }
        Ok(res)
    }

    /// Returns the resolved cases for `mnemonic`, in catalog order.
    ///
    /// An instruction with no cataloged cases yields an empty list.
    pub fn load(&self, mnemonic: &str, operands: &[Operand])
        -> CsResult<Vec<CompSimpCase>>
    {
        let entries = match self.entries.get(mnemonic) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        entries.iter()
            .map(|e| e.resolve(mnemonic, operands))
            .collect()
    }

    /// All cataloged mnemonics (sorted).
    pub fn mnemonics(&self) -> Vec<&str> {
        let mut res: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        res.sort_unstable();
        res
    }

    /// Total number of cases (rows).
    pub fn len(&self) -> usize { self.rows }

    pub fn is_empty(&self) -> bool { self.rows == 0 }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::asm::Gpr;
    use crate::case::{ ScratchSlot, Solution };

    const HEADER: &str = "instruction,n_operands,other_srcs,dests,cs_operand,\
                          cs_value,cs_safe_value,cs_solutions\n";

    fn catalog(rows: &str) -> CsResult<CaseCatalog> {
        CaseCatalog::from_csv_str(&format!("{}{}", HEADER, rows))
    }

    fn ops(names: &[&str]) -> Vec<Operand> {
        names.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn load_preserves_order() {
        let cat = catalog("\
            ADD64rr,2,,0,1,0,1,op:0\n\
            SUB64rr,2,,0,1,0,1,op:0\n\
            ADD64rr,2,,0,0,0,1,op:1\n").unwrap();
        assert_eq!(cat.len(), 3);
        assert_eq!(cat.mnemonics(), vec!["ADD64rr", "SUB64rr"]);

        let cases = cat.load("ADD64rr", &ops(&["rax", "rbx"])).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].row, 2);
        assert_eq!(cases[1].row, 4);
        assert_eq!(cases[0].cs_operand, Reg::q(Gpr::Rbx));
        assert_eq!(cases[1].cs_operand, Reg::q(Gpr::Rax));
        assert_eq!(cases[1].solutions, vec![Solution::Saved(ScratchSlot(1))]);
        assert_eq!(cases[0].destinations, vec![Reg::q(Gpr::Rax)]);
    }

    #[test]
    fn implicit_sources_and_dests() {
        let cat = catalog("MUL64r,1,rax,\"rax,rdx\",rax,0,1,\"const:0,const:0\"\n")
            .unwrap();
        let cases = cat.load("MUL64r", &ops(&["rcx"])).unwrap();
        assert_eq!(cases[0].other_sources, vec![Reg::q(Gpr::Rax)]);
        assert_eq!(cases[0].destinations,
            vec![Reg::q(Gpr::Rax), Reg::q(Gpr::Rdx)]);
        assert_eq!(cases[0].source_count(), 2);
    }

    #[test]
    fn arity_mismatch() {
        let cat = catalog("ADD64rr,2,,0,1,0,1,op:0\n").unwrap();
        match cat.load("ADD64rr", &ops(&["rax"])) {
            Err(CsError::ArityMismatch { expected: 2, found: 1, row: 2, .. }) => {},
            other => panic!("unexpected {:?}", other),
        }
        assert!(cat.load("ADD64rr", &ops(&["rax", "rbx", "rcx"])).is_err());
    }

    #[test]
    fn unknown_mnemonic_is_empty() {
        let cat = catalog("ADD64rr,2,,0,1,0,1,op:0\n").unwrap();
        assert!(cat.load("NOPEXISTS", &ops(&["rax"])).unwrap().is_empty());
    }

    #[test]
    fn malformed_rows() {
        assert!(matches!(catalog("ADD64rr,two,,0,1,0,1,op:0\n"),
            Err(CsError::MalformedRow { column: "n_operands", .. })));
        assert!(matches!(catalog("ADD64rr,2,,0,1,zero,1,op:0\n"),
            Err(CsError::MalformedRow { column: "cs_value", .. })));
        assert!(matches!(catalog("ADD64rr,2,,0,1,0,1,\"op:0,op:1\"\n"),
            Err(CsError::MalformedRow { column: "cs_solutions", .. })));
        match catalog("SUB64rr,2,,0,1,0,one,op:0\n") {
            Err(e @ CsError::MalformedRow { .. }) => {
                let msg = e.to_string();
                assert!(msg.starts_with("SUB64rr (row 2)"), "{}", msg);
                assert!(msg.contains("cs_safe_value"), "{}", msg);
            },
            res => panic!("unexpected {:?}", res),
        }
        assert!(matches!(catalog("ADD64rr,2,xmm0,0,1,0,1,op:0\n"),
            Err(CsError::Reference { .. })));
    }

    #[test]
    fn out_of_bounds_reference() {
        let cat = catalog("ADD64rr,2,,0,1,0,1,op:2\n").unwrap();
        assert!(matches!(cat.load("ADD64rr", &ops(&["rax", "rbx"])),
            Err(CsError::Reference {
                source: ReferenceError::OperandIndex { index: 2, count: 2 }, ..
            })));
    }

    #[test]
    fn duplicate_trigger() {
        let res = catalog("\
            IMUL64rr,2,,0,1,0,1,const:0\n\
            IMUL64rr,2,,0,1,0,2,const:0\n");
        assert!(matches!(res,
            Err(CsError::DuplicateCase { first: 2, second: 3, .. })));

        // same value on different operands is fine
        assert!(catalog("\
            IMUL64rr,2,,0,0,0,1,const:0\n\
            IMUL64rr,2,,0,1,0,1,const:0\n").is_ok());
    }
}
