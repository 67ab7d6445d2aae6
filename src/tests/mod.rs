//! Cross-module tests that drive whole tank records through the pipeline.
