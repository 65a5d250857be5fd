// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! On-disk journal backing the queue. The file is a sequence of frames, each a 4-byte
//! little-endian length followed by a checksummed bincode record. Replay stops at the first frame
//! that is incomplete or fails its checksum, which is what a write torn by a crash looks like.

use beacon_client_common::file::{
  read_checksummed_record,
  write_checksummed_record,
  write_file_atomically,
};
use beacon_events::Event;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const FRAME_HEADER_LEN: usize = 4;

/// A replayed record.
#[derive(Deserialize, Debug)]
pub enum JournalRecord {
  Push { seq: u64, event: Event },
  Pop { through: u64 },
}

/// The write side of `JournalRecord`. Encodes identically but borrows the event.
#[derive(Serialize, Debug)]
pub enum JournalEntry<'a> {
  Push { seq: u64, event: &'a Event },
  Pop { through: u64 },
}

pub struct Journal {
  path: PathBuf,
  file: File,
  len: u64,
  sync_writes: bool,

  // Set when a failed append could not be cut back off the file.
  torn: bool,
}

fn open_append(path: &Path) -> std::io::Result<File> {
  OpenOptions::new()
    .create(true)
    .read(true)
    .append(true)
    .open(path)
}

fn frame(entry: &JournalEntry<'_>) -> anyhow::Result<Vec<u8>> {
  let record = write_checksummed_record(entry)?;
  let len = u32::try_from(record.len())?;
  let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + record.len());
  framed.extend_from_slice(&len.to_le_bytes());
  framed.extend_from_slice(&record);
  Ok(framed)
}

impl Journal {
  /// Opens or creates the journal, returning every intact record in write order. A torn tail is
  /// cut off so that later appends land after the last good frame.
  pub fn open(path: &Path, sync_writes: bool) -> anyhow::Result<(Self, Vec<JournalRecord>)> {
    let mut file = open_append(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let mut records = Vec::new();
    let mut offset = 0;
    while offset < contents.len() {
      let Some((record, frame_len)) = Self::read_frame(&contents[offset ..]) else {
        break;
      };
      records.push(record);
      offset += frame_len;
    }

    if offset < contents.len() {
      log::warn!(
        "discarding {} bytes of torn journal tail at offset {offset}",
        contents.len() - offset
      );
      file.set_len(offset as u64)?;
      file.sync_all()?;
    }

    Ok((
      Self {
        path: path.to_path_buf(),
        file,
        len: offset as u64,
        sync_writes,
        torn: false,
      },
      records,
    ))
  }

  fn read_frame(data: &[u8]) -> Option<(JournalRecord, usize)> {
    let header: [u8; FRAME_HEADER_LEN] = data.get(.. FRAME_HEADER_LEN)?.try_into().ok()?;
    let len = u32::from_le_bytes(header) as usize;
    let body = data.get(FRAME_HEADER_LEN .. FRAME_HEADER_LEN + len)?;
    let record = read_checksummed_record(body).ok()?;
    Some((record, FRAME_HEADER_LEN + len))
  }

  /// Appends a single frame. On failure the file is cut back to its previous length so a partial
  /// frame never precedes later writes.
  pub fn append(&mut self, entry: &JournalEntry<'_>) -> anyhow::Result<()> {
    let framed = frame(entry)?;
    let result = self.file.write_all(&framed).and_then(|()| {
      if self.sync_writes {
        self.file.sync_data()
      } else {
        Ok(())
      }
    });

    if let Err(e) = result {
      if self.file.set_len(self.len).is_err() {
        self.torn = true;
      }
      return Err(e.into());
    }

    self.len += framed.len() as u64;
    Ok(())
  }

  /// Replaces the journal with one push record per remaining event.
  pub fn rewrite<'a>(
    &mut self,
    events: impl Iterator<Item = &'a (u64, Event)>,
  ) -> anyhow::Result<()> {
    let mut contents = Vec::new();
    for (seq, event) in events {
      contents.extend(frame(&JournalEntry::Push { seq: *seq, event })?);
    }

    write_file_atomically(&self.path, &contents)?;
    self.file = open_append(&self.path)?;
    self.len = contents.len() as u64;
    self.torn = false;
    Ok(())
  }

  #[must_use]
  pub const fn is_torn(&self) -> bool {
    self.torn
  }
}
