// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// How a file should be opened.
///
/// A value-type rendering of the usual open flags, carried across the adapter
/// boundary instead of a raw bit mask so that underlying implementations on
/// any platform can interpret it. The builder mirrors [`std::fs::OpenOptions`].
///
/// ```
/// use sluice::OpenOptions;
///
/// let opts = OpenOptions::new().read(true).write(true).create(true);
/// assert!(opts.is_read() && opts.is_write());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
}

impl OpenOptions {
    /// A blank set of options; all flags start `false`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            truncate: false,
            create: false,
            create_new: false,
        }
    }

    /// Requests read access.
    #[must_use]
    pub const fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Requests write access.
    #[must_use]
    pub const fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Positions every write at the end of the file.
    #[must_use]
    pub const fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Truncates the file to zero length on open.
    #[must_use]
    pub const fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Creates the file if it does not exist.
    #[must_use]
    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Creates the file, failing if it already exists.
    #[must_use]
    pub const fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    /// Whether read access was requested.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        self.read
    }

    /// Whether write access was requested.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.write
    }

    /// Whether append mode was requested.
    #[must_use]
    pub const fn is_append(&self) -> bool {
        self.append
    }

    /// Whether truncation on open was requested.
    #[must_use]
    pub const fn is_truncate(&self) -> bool {
        self.truncate
    }

    /// Whether creation is permitted.
    #[must_use]
    pub const fn is_create(&self) -> bool {
        self.create
    }

    /// Whether exclusive creation was requested.
    #[must_use]
    pub const fn is_create_new(&self) -> bool {
        self.create_new
    }

    /// Applies these options to a [`std::fs::OpenOptions`].
    #[must_use]
    pub fn to_std(&self) -> std::fs::OpenOptions {
        let mut std_opts = std::fs::OpenOptions::new();
        std_opts
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .truncate(self.truncate)
            .create(self.create)
            .create_new(self.create_new);
        std_opts
    }
}
