//! Column contract of `mtr --report -n` output.
//!
//! ```text
//! Start: 2024-05-02T10:00:00+0000
//! HOST: probe-1                   Loss%   Snt   Last   Avg  Best  Wrst StDev
//!   1.|-- 192.168.1.1              0.0%     3    0.4   0.5   0.4   0.7   0.1
//!   2.|-- ???                     100.0     3    0.0   0.0   0.0   0.0   0.0
//! ```
//!
//! Hop lines start with an index followed by a period. Every other line is
//! ignored. All format knowledge lives in this file.

use crate::error::MeasureError;
use crate::structures::HopRecord;

const NO_REPLY: &str = "???";

const COL_ADDRESS: usize = 1;
const COL_LOSS: usize = 2;
const COL_SENT: usize = 3;
const COL_LAST: usize = 4;
const COL_AVG: usize = 5;
const COL_BEST: usize = 6;
const COL_WORST: usize = 7;
const COL_STDDEV: usize = 8;

/// Parses a whole report. A single malformed hop line fails the report.
pub fn parse_report(text: &str) -> Result<Vec<HopRecord>, MeasureError> {
    let mut hops = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if !is_hop_line(line) {
            continue;
        }
        let hop = hops.len() as u32 + 1;
        hops.push(parse_hop_line(line, idx + 1, hop)?);
    }

    Ok(hops)
}

/// Matches `^\s*\d+\.`.
pub fn is_hop_line(line: &str) -> bool {
    let rest = line.trim_start();
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && rest[digits..].starts_with('.')
}

/// Parses one hop line; `hop` is assigned by the caller, the index printed
/// by mtr is not trusted.
pub fn parse_hop_line(line: &str, line_no: usize, hop: u32) -> Result<HopRecord, MeasureError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let column = |idx: usize, field: &'static str| {
        tokens
            .get(idx)
            .copied()
            .ok_or(MeasureError::MissingColumn {
                line: line_no,
                field,
            })
    };
    let float = |idx: usize, field: &'static str| -> Result<f64, MeasureError> {
        let raw = column(idx, field)?;
        raw.parse::<f64>().map_err(|_| MeasureError::Field {
            line: line_no,
            field,
            value: raw.to_string(),
        })
    };

    let address = column(COL_ADDRESS, "address")?;
    let address = if address == NO_REPLY {
        None
    } else {
        Some(address.to_string())
    };

    let loss = column(COL_LOSS, "loss")?;
    let loss_percent = loss
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|_| MeasureError::Field {
            line: line_no,
            field: "loss",
            value: loss.to_string(),
        })?;

    let sent = column(COL_SENT, "sent")?;
    let sent = sent.parse::<u32>().map_err(|_| MeasureError::Field {
        line: line_no,
        field: "sent",
        value: sent.to_string(),
    })?;

    Ok(HopRecord {
        address,
        hostname: String::new(),
        hop,
        sent,
        loss_percent,
        last: float(COL_LAST, "last")?,
        avg: float(COL_AVG, "avg")?,
        best: float(COL_BEST, "best")?,
        worst: float(COL_WORST, "worst")?,
        stddev: float(COL_STDDEV, "stddev")?,
    })
}
