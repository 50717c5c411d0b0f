//! excelint_engine - workbook model, references and the dependency graph.

pub mod model;
