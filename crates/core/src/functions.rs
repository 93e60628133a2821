//! Catalog of processing functions offered by the spreadsheet service.
//!
//! The service accepts any well-formed function id; this list is what the
//! front end presents as buttons and what `xlproc functions` prints.

/// A selectable transformation on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingFunction {
    /// Path segment sent to `/api/process/{id}` and `/api/status/{id}`.
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const PROCESSING_FUNCTIONS: &[ProcessingFunction] = &[
    ProcessingFunction {
        id: "func1",
        name: "Merge Files",
        description: "Combine multiple Excel files into one",
    },
    ProcessingFunction {
        id: "func2",
        name: "Filter Data",
        description: "Remove duplicate entries",
    },
    ProcessingFunction {
        id: "func3",
        name: "Sort Data",
        description: "Sort by specified column",
    },
    ProcessingFunction {
        id: "func4",
        name: "Calculate Sum",
        description: "Sum numeric columns",
    },
    ProcessingFunction {
        id: "func5",
        name: "Format Dates",
        description: "Standardize date formats",
    },
    ProcessingFunction {
        id: "func6",
        name: "Remove Empty",
        description: "Remove empty rows and columns",
    },
    ProcessingFunction {
        id: "func7",
        name: "Validate Data",
        description: "Check data consistency",
    },
    ProcessingFunction {
        id: "func8",
        name: "Generate Report",
        description: "Create summary report",
    },
];

/// Look up a catalog entry by id.
pub fn find_function(id: &str) -> Option<&'static ProcessingFunction> {
    PROCESSING_FUNCTIONS.iter().find(|f| f.id == id)
}
