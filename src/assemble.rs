//! Artifact assembly: PNG archives and PDF documents.

use crate::capture::CaptureResult;
use crate::error::{Error, Result};
use crate::rendering::layout::fit_centered;
use crate::rendering::Screenshot;
use crate::OutputFormat;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{info, warn};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// What a failed slide does to the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Omit the slide, keep going, report it in the run message
    #[default]
    Lenient,
    /// Abort the run with the first failure
    Strict,
}

/// One artifact in the output, tied to the slide it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// `NNN.png`, numbered by position among successful slides
    pub name: String,
    /// 1-based slide index
    pub slide: usize,
    pub png: Vec<u8>,
}

/// A failed slide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub slide: usize,
    pub message: String,
}

/// The output of a run. Built once by the assembler.
#[derive(Debug, Clone)]
pub struct RunResult {
    format: OutputFormat,
    buffer: Vec<u8>,
    entries: Vec<Entry>,
    failures: Vec<Failure>,
    warnings: Vec<String>,
    message: String,
}

impl RunResult {
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Zip or PDF bytes
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Script load and execution problems that did not fail a slide
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// At least one slide made it into the output
    pub fn success(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Archive entry name for the `position`-th (1-based) artifact
pub fn entry_name(position: usize) -> String {
    format!("{:03}.png", position)
}

pub struct Assembler {
    format: OutputFormat,
    page_size: (f64, f64),
    background: [u8; 3],
    policy: FailurePolicy,
}

impl Assembler {
    pub fn new(format: OutputFormat, page_size: (f64, f64), background: [u8; 3], policy: FailurePolicy) -> Self {
        Self { format, page_size, background, policy }
    }

    /// Order `results` by slide index and build the output
    pub fn assemble(&self, mut results: Vec<CaptureResult>) -> Result<RunResult> {
        results.sort_by_key(|r| r.index);
        let total = results.len();

        let mut shots: Vec<(usize, Screenshot)> = Vec::new();
        let mut failures = Vec::new();
        let mut warnings = Vec::new();
        for result in results {
            warnings.extend(
                result
                    .warnings
                    .iter()
                    .map(|w| format!("slide {}: {}", result.index, w)),
            );
            match result.outcome {
                Ok(shot) => shots.push((result.index, shot)),
                Err(err) => {
                    if self.policy == FailurePolicy::Strict {
                        return Err(err);
                    }
                    warn!("omitting slide {}: {}", result.index, err);
                    failures.push(Failure {
                        slide: result.index,
                        message: err.to_string(),
                    });
                }
            }
        }

        if shots.is_empty() {
            return Err(Error::NoArtifacts { failed: failures.len() });
        }

        let entries: Vec<Entry> = shots
            .iter()
            .enumerate()
            .map(|(i, (slide, shot))| Entry {
                name: entry_name(i + 1),
                slide: *slide,
                png: shot.png_data.clone(),
            })
            .collect();

        let buffer = match self.format {
            OutputFormat::Png => write_archive(&entries)?,
            OutputFormat::Pdf => {
                let shots: Vec<&Screenshot> = shots.iter().map(|(_, s)| s).collect();
                self.write_pdf(&shots)?
            }
        };

        let message = if failures.is_empty() {
            format!("Captured {} slide(s)", entries.len())
        } else {
            let failed = failures
                .iter()
                .map(|f| f.slide.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Captured {} of {} slides; failed slide(s): {}",
                entries.len(),
                total,
                failed
            )
        };
        info!("{}", message);

        Ok(RunResult {
            format: self.format,
            buffer,
            entries,
            failures,
            warnings,
            message,
        })
    }

    fn write_pdf(&self, shots: &[&Screenshot]) -> Result<Vec<u8>> {
        let pdf_err = |e: &dyn std::fmt::Display| Error::PdfError(e.to_string());
        let (page_w, page_h) = self.page_size;

        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(shots.len());

        for shot in shots {
            let rgb = shot.to_rgb(self.background)?;
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(rgb.as_raw()).map_err(|e| pdf_err(&e))?;
            let pixels = encoder.finish().map_err(|e| pdf_err(&e))?;

            let image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => shot.width as i64,
                    "Height" => shot.height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8i64,
                    "Filter" => "FlateDecode",
                },
                pixels,
            );
            let image_id = doc.add_object(image);

            // PDF origin is bottom-left; the rect is symmetric so y is unchanged
            let rect = fit_centered((shot.width, shot.height), self.page_size);
            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            Object::Real(rect.width as f32),
                            Object::Integer(0),
                            Object::Integer(0),
                            Object::Real(rect.height as f32),
                            Object::Real(rect.x as f32),
                            Object::Real(rect.y as f32),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().map_err(|e| pdf_err(&e))?));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(page_w as f32),
                    Object::Real(page_h as f32),
                ],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => image_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).map_err(|e| pdf_err(&e))?;
        Ok(out)
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Zip of `entries`, stored uncompressed with fixed metadata so equal input
/// gives equal bytes.
fn write_archive(entries: &[Entry]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        zip.start_file(entry.name.as_str(), entry_options())
            .map_err(|e| Error::ArchiveError(e.to_string()))?;
        zip.write_all(&entry.png)
            .map_err(|e| Error::ArchiveError(e.to_string()))?;
    }
    let cursor = zip.finish().map_err(|e| Error::ArchiveError(e.to_string()))?;
    Ok(cursor.into_inner())
}
