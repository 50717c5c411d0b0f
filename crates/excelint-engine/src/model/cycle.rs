//! Bounded circular-reference search over the dependency graph.
//!
//! Walks `dependencies` depth-first from a cell and reports whether the walk
//! comes back to it. The walk gives up past a fixed depth, so very long chains
//! are reported as [`CycleSearch::DepthExceeded`] rather than followed to the end.

use std::collections::HashSet;

use super::WorkbookContext;
use super::cell_ref::split_qualified;

/// Default depth cap for the walk.
pub const MAX_CYCLE_DEPTH: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleSearch {
    /// The origin was reached again. The path starts at the origin and ends
    /// with the cell that points back at it, so a self reference has length 1.
    Found(Vec<String>),
    /// No cycle seen, but some branch went deeper than the cap.
    DepthExceeded,
    Clear,
}

impl CycleSearch {
    pub fn path(&self) -> Option<&[String]> {
        match self {
            CycleSearch::Found(path) => Some(path),
            _ => None,
        }
    }
}

/// Search for a cycle through `sheet!address`.
pub fn find_cycle(
    workbook: &WorkbookContext,
    sheet: &str,
    address: &str,
    max_depth: usize,
) -> CycleSearch {
    let Some(origin) = workbook.get_cell(sheet, address) else {
        return CycleSearch::Clear;
    };
    let origin_key = origin.key();
    let mut walk = Walk {
        workbook,
        origin: &origin_key,
        max_depth,
        visited: HashSet::new(),
        path: vec![origin_key.clone()],
        exceeded: false,
    };

    for dep in &origin.dependencies {
        if walk.visit(dep, 0) {
            return CycleSearch::Found(walk.path);
        }
    }

    if walk.exceeded {
        CycleSearch::DepthExceeded
    } else {
        CycleSearch::Clear
    }
}

struct Walk<'a> {
    workbook: &'a WorkbookContext,
    origin: &'a str,
    max_depth: usize,
    visited: HashSet<String>,
    path: Vec<String>,
    exceeded: bool,
}

impl Walk<'_> {
    fn visit(&mut self, current: &str, depth: usize) -> bool {
        if current == self.origin {
            return true;
        }
        if depth >= self.max_depth {
            self.exceeded = true;
            return false;
        }
        if !self.visited.insert(current.to_string()) {
            return false;
        }

        let (sheet, address) = split_qualified(current);
        let Some(cell) = sheet.and_then(|s| self.workbook.get_cell(s, address)) else {
            return false;
        };

        self.path.push(current.to_string());
        for dep in &cell.dependencies {
            if self.visit(dep, depth + 1) {
                return true;
            }
        }
        self.path.pop();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(len: usize, closed: bool) -> WorkbookContext {
        let mut wb = WorkbookContext::new("f", "f.xlsx");
        let sheet = wb.sheet_mut("Sheet1");
        for i in 1..=len {
            let target = if i == len {
                if closed { 1 } else { len + 1 }
            } else {
                i + 1
            };
            sheet.set_formula(&format!("A{}", i), format!("=A{}+1", target));
        }
        wb.rebuild_dependencies();
        wb
    }

    #[test]
    fn test_direct_cycle() {
        let wb = chain(2, true);
        assert_eq!(
            find_cycle(&wb, "Sheet1", "A1", MAX_CYCLE_DEPTH),
            CycleSearch::Found(vec!["Sheet1!A1".into(), "Sheet1!A2".into()])
        );
    }

    #[test]
    fn test_self_reference() {
        let mut wb = WorkbookContext::new("f", "f.xlsx");
        wb.sheet_mut("Sheet1").set_formula("A1", "=A1+1");
        wb.rebuild_dependencies();
        assert_eq!(
            find_cycle(&wb, "Sheet1", "A1", MAX_CYCLE_DEPTH),
            CycleSearch::Found(vec!["Sheet1!A1".into()])
        );
    }

    #[test]
    fn test_open_chain_is_clear() {
        let wb = chain(4, false);
        assert_eq!(find_cycle(&wb, "Sheet1", "A1", MAX_CYCLE_DEPTH), CycleSearch::Clear);
    }

    #[test]
    fn test_long_cycle_hits_depth_cap() {
        let wb = chain(15, true);
        assert_eq!(find_cycle(&wb, "Sheet1", "A1", MAX_CYCLE_DEPTH), CycleSearch::DepthExceeded);
        assert!(matches!(find_cycle(&wb, "Sheet1", "A1", 20), CycleSearch::Found(p) if p.len() == 15));
    }

    #[test]
    fn test_unknown_cell_is_clear() {
        let wb = chain(2, true);
        assert_eq!(find_cycle(&wb, "Sheet1", "Z9", MAX_CYCLE_DEPTH), CycleSearch::Clear);
    }
}
