/*!
# Sheet Analyst

An HTTP service and command-line tool that turns an uploaded spreadsheet into
an HTML analysis report written by a large language model.

## Overview

A spreadsheet (.xlsx or .xls, optionally .csv) is read into an in-memory
[`table::Table`], normalized, serialized to CSV text and embedded in an
instructional prompt. The prompt is sent to the Xingyun chat-completion API
and the HTML document it returns is stored as a timestamped report that can
be downloaded later.

## Pipelines

- **Direct HTML**: the model writes the whole report page
- **Charts**: bar and line charts are rendered locally as SVG and the model
  writes the explanation placed under them
- **URL fetch**: the spreadsheet is downloaded from a caller-supplied URL
  instead of being uploaded

## Modules

- **table**: Cell values, columns and tables
- **reader**: Spreadsheet loading and multi-level header flattening
- **cleaner**: Column name normalization, empty row/column removal, numeric
  and date coercion
- **delimited**: Quote-aware CSV records
- **prompt**: Prompt templates and assembly
- **llm**: Chat-completion client and response decoding
- **report**: Timestamp-named report storage
- **chart**: SVG chart planning and rendering
- **pipeline**: Read → clean → prompt → LLM → store
- **config**: Environment configuration
- **app**: HTTP routes (feature `web`)

## REST API Endpoints

- `GET /` - Service description
- `GET /health` - Health check
- `POST /analyze` - Upload a file, receive the HTML report as an attachment
- `POST /analyze/download` - Upload a file, receive a download link
- `POST /analyze/charts` - Upload a file, receive a link to a chart report
- `POST /analyze_by_file_url` - Analyze a file fetched from a URL
- `GET /download/{filename}` - Fetch a stored report
*/

pub mod chart;
pub mod cleaner;
pub mod config;
pub mod delimited;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod reader;
pub mod report;
pub mod table;

#[cfg(feature = "web")]
pub mod app;

pub use error::{AnalysisError, AnalysisResult};
pub use table::{CellValue, Column, ColumnKind, Table};
