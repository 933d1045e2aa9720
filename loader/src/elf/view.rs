//! ELF Image View
//!
//! Read-only structured interpretation of an ELF64 byte buffer: file
//! header, program and section header tables, string tables and the symbol
//! table, all as bounds-checked views over the same bytes. Pure parsing;
//! no mutation, no OS interaction.

use core::mem;

use elfcall_common::span::{Plain, Span};
use elfcall_common::{
    Elf64Header, Elf64ProgramHeader, Elf64SectionHeader, Elf64Symbol, ELFCLASS64, ELFDATA2LSB,
    ELF_MAGIC, EM_X86_64, ET_DYN, ET_REL, SHN_UNDEF, SHT_DYNSYM, SHT_STRTAB, SHT_SYMTAB,
};
use log::trace;

use super::error::{ElfError, ElfResult};

/// Structured view over an ELF64 image
pub struct ElfView<'a> {
    data: Span<'a>,
    header: &'a Elf64Header,
    program_headers: &'a [Elf64ProgramHeader],
    section_headers: &'a [Elf64SectionHeader],
    section_names: Span<'a>,
    symbol_names: Span<'a>,
    symbols: &'a [Elf64Symbol],
}

impl<'a> ElfView<'a> {
    /// Parse and validate an ELF64 image.
    ///
    /// Construction is a pure function of the bytes: the same buffer always
    /// yields the same view or the same error.
    pub fn parse(bytes: &'a [u8]) -> ElfResult<Self> {
        let data = Span::new(bytes);

        let header: &Elf64Header = data.view(0).ok_or(ElfError::Truncated("file header"))?;
        Self::validate_header(header)?;

        let program_headers = data
            .view_array::<Elf64ProgramHeader>(header.e_phoff as usize, header.e_phnum as usize)
            .ok_or(ElfError::Truncated("program header table"))?;
        let section_headers = data
            .view_array::<Elf64SectionHeader>(header.e_shoff as usize, header.e_shnum as usize)
            .ok_or(ElfError::Truncated("section header table"))?;

        let section_names = Self::section_name_table(data, header, section_headers)?;

        // A dynamically linked image carries DYNSYM/.dynstr, a statically
        // linked one SYMTAB/.strtab; the selected pair must be unique.
        let dynamic = section_headers.iter().any(|sh| sh.sh_type == SHT_DYNSYM);
        let (symtab_type, strtab_name, symtab_what, strtab_what) = if dynamic {
            (SHT_DYNSYM, ".dynstr", "dynamic symbol table", "dynamic symbol string table")
        } else {
            (SHT_SYMTAB, ".strtab", "symbol table", "symbol string table")
        };

        let strtab = find_single(section_headers, strtab_what, |sh| {
            if sh.sh_type != SHT_STRTAB {
                return Ok(false);
            }
            let name = section_names
                .cstr_at(sh.sh_name as usize)
                .ok_or(ElfError::BadString(sh.sh_name as usize))?;
            Ok(name == strtab_name)
        })?;
        let symbol_names = section_bytes(data, strtab)?;

        let symtab = find_single(section_headers, symtab_what, |sh| Ok(sh.sh_type == symtab_type))?;
        let symbols = typed_section_data::<Elf64Symbol>(data, symtab)?;

        trace!(
            "parsed image: {} program headers, {} sections, {} symbols",
            program_headers.len(),
            section_headers.len(),
            symbols.len()
        );

        Ok(ElfView {
            data,
            header,
            program_headers,
            section_headers,
            section_names,
            symbol_names,
            symbols,
        })
    }

    fn validate_header(header: &Elf64Header) -> ElfResult<()> {
        if header.e_ident[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if header.e_ident[4] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass);
        }
        if header.e_ident[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEndian);
        }
        if header.e_machine != EM_X86_64 {
            return Err(ElfError::UnsupportedMachine(header.e_machine));
        }
        if header.e_type != ET_DYN && header.e_type != ET_REL {
            return Err(ElfError::UnsupportedFileType(header.e_type));
        }
        if header.e_phnum > 0 && header.e_phentsize as usize != mem::size_of::<Elf64ProgramHeader>()
        {
            return Err(ElfError::BadEntrySize("program header"));
        }
        if header.e_shnum > 0 && header.e_shentsize as usize != mem::size_of::<Elf64SectionHeader>()
        {
            return Err(ElfError::BadEntrySize("section header"));
        }
        Ok(())
    }

    fn section_name_table(
        data: Span<'a>,
        header: &Elf64Header,
        section_headers: &'a [Elf64SectionHeader],
    ) -> ElfResult<Span<'a>> {
        let index = header.e_shstrndx;
        if index == SHN_UNDEF {
            return Err(ElfError::NoSectionNameTable);
        }
        let shdr = section_headers
            .get(index as usize)
            .ok_or(ElfError::Truncated("section name string table header"))?;
        section_bytes(data, shdr)
    }

    /// Resolve a symbol by exact name match.
    ///
    /// Exactly one entry must match; zero or several matches are lookup
    /// errors.
    pub fn resolve_symbol(&self, name: &str) -> ElfResult<&'a Elf64Symbol> {
        let mut found = None;
        for sym in self.symbols {
            if self.symbol_name(sym)? != name {
                continue;
            }
            if found.is_some() {
                return Err(ElfError::AmbiguousSymbol(name.to_string()));
            }
            found = Some(sym);
        }
        found.ok_or_else(|| ElfError::SymbolNotFound(name.to_string()))
    }

    /// Whole-image bytes
    pub fn data(&self) -> Span<'a> {
        self.data
    }

    pub fn header(&self) -> &'a Elf64Header {
        self.header
    }

    pub fn program_headers(&self) -> &'a [Elf64ProgramHeader] {
        self.program_headers
    }

    pub fn section_headers(&self) -> &'a [Elf64SectionHeader] {
        self.section_headers
    }

    pub fn symbols(&self) -> &'a [Elf64Symbol] {
        self.symbols
    }

    /// Section-name string table bytes
    pub fn section_string_table(&self) -> Span<'a> {
        self.section_names
    }

    /// Symbol string table bytes
    pub fn symbol_string_table(&self) -> Span<'a> {
        self.symbol_names
    }

    /// Name of a section, read from the section-name string table
    pub fn section_name(&self, shdr: &Elf64SectionHeader) -> ElfResult<&'a str> {
        self.section_names
            .cstr_at(shdr.sh_name as usize)
            .ok_or(ElfError::BadString(shdr.sh_name as usize))
    }

    /// Name of a symbol, read from the symbol string table
    pub fn symbol_name(&self, sym: &Elf64Symbol) -> ElfResult<&'a str> {
        self.symbol_names
            .cstr_at(sym.st_name as usize)
            .ok_or(ElfError::BadString(sym.st_name as usize))
    }

    /// Raw bytes of a section
    pub fn section_data(&self, shdr: &Elf64SectionHeader) -> ElfResult<Span<'a>> {
        section_bytes(self.data, shdr)
    }

    /// View a section's data as an array of `T`.
    ///
    /// Rejects the section when its `sh_entsize` disagrees with `T` or its
    /// size is not an exact multiple of `T` — a mismatch means the wrong
    /// section was selected, not that truncation is acceptable.
    pub fn section_data_as<T: Plain>(&self, shdr: &Elf64SectionHeader) -> ElfResult<&'a [T]> {
        typed_section_data(self.data, shdr)
    }
}

fn section_bytes<'a>(data: Span<'a>, shdr: &Elf64SectionHeader) -> ElfResult<Span<'a>> {
    data.slice(shdr.sh_offset as usize, shdr.sh_size as usize)
        .ok_or(ElfError::Truncated("section data"))
}

fn typed_section_data<'a, T: Plain>(
    data: Span<'a>,
    shdr: &Elf64SectionHeader,
) -> ElfResult<&'a [T]> {
    let elem = mem::size_of::<T>();
    if shdr.sh_entsize != 0 && shdr.sh_entsize as usize != elem {
        return Err(ElfError::EntrySizeMismatch);
    }
    if shdr.sh_size as usize % elem != 0 {
        return Err(ElfError::MisalignedSectionSize);
    }
    let count = shdr.sh_size as usize / elem;
    data.view_array(shdr.sh_offset as usize, count)
        .ok_or(ElfError::Truncated("section data"))
}

/// Find the single item satisfying `pred`; zero or multiple matches are
/// format errors naming `what`.
fn find_single<'s, T>(
    items: &'s [T],
    what: &'static str,
    mut pred: impl FnMut(&T) -> ElfResult<bool>,
) -> ElfResult<&'s T> {
    let mut found = None;
    for item in items {
        if !pred(item)? {
            continue;
        }
        if found.is_some() {
            return Err(ElfError::AmbiguousSection(what));
        }
        found = Some(item);
    }
    found.ok_or(ElfError::MissingSection(what))
}
