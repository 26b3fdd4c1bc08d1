#![warn(clippy::todo, unused_qualifications)]

pub mod io;
pub mod path;

/// Formats a byte count with binary prefixes, e.g. `1.50 MiB`.
pub fn format_size<T>(value: T) -> humansize::SizeFormatter<T, humansize::FormatSizeOptions>
where
    T: humansize::ToF64 + humansize::Unsigned,
{
    humansize::SizeFormatter::new(value, humansize::BINARY)
}
