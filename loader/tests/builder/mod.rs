//! Synthetic ELF64 image builder.
//!
//! Assembles well-formed (or deliberately malformed) ELF64 images in memory
//! so loader behavior can be tested without compiled fixtures on disk.

use core::mem;

use elfcall_common::{
    Elf64Header, Elf64ProgramHeader, Elf64Rela, Elf64SectionHeader, Elf64Symbol, ELFCLASS64,
    ELFDATA2LSB, ELF_MAGIC, EM_X86_64, ET_DYN, PF_R, PF_W, PF_X, PT_LOAD, SHT_DYNSYM, SHT_RELA,
    SHT_STRTAB, SHT_SYMTAB,
};

const SYM_ENTSIZE: usize = mem::size_of::<Elf64Symbol>();

fn bytes_of<T: Copy>(value: &T) -> Vec<u8> {
    let ptr = value as *const T as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, mem::size_of::<T>()) }.to_vec()
}

/// Build symbol-table and string-table data blobs, with the customary null
/// entry at index 0. Returns `(symtab, strtab)`.
pub fn symbol_blobs(symbols: &[(&str, u64)]) -> (Vec<u8>, Vec<u8>) {
    let mut strtab = vec![0u8];
    let mut symtab = vec![0u8; SYM_ENTSIZE];
    for (name, value) in symbols {
        let st_name = strtab.len() as u32;
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
        let sym = Elf64Symbol {
            st_name,
            st_info: 0x12, // GLOBAL | FUNC
            st_other: 0,
            st_shndx: 1,
            st_value: *value,
            st_size: 0,
        };
        symtab.extend_from_slice(&bytes_of(&sym));
    }
    (symtab, strtab)
}

struct SegmentDef {
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
}

struct SectionDef {
    name: String,
    sh_type: u32,
    data: Vec<u8>,
    entsize: u64,
}

pub struct ImageBuilder {
    segments: Vec<SegmentDef>,
    sections: Vec<SectionDef>,
    undef_shstrndx: bool,
}

impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder {
            segments: Vec::new(),
            sections: Vec::new(),
            undef_shstrndx: false,
        }
    }

    /// Add a loadable segment whose memory size equals its file size.
    pub fn segment(mut self, vaddr: u64, data: &[u8]) -> Self {
        self.segments.push(SegmentDef {
            vaddr,
            data: data.to_vec(),
            memsz: data.len() as u64,
        });
        self
    }

    /// Add a loadable segment declaring zero-fill padding beyond its file
    /// content.
    pub fn segment_padded(mut self, vaddr: u64, data: &[u8], memsz: u64) -> Self {
        self.segments.push(SegmentDef {
            vaddr,
            data: data.to_vec(),
            memsz,
        });
        self
    }

    pub fn with_section(mut self, name: &str, sh_type: u32, data: &[u8], entsize: u64) -> Self {
        self.sections.push(SectionDef {
            name: name.to_string(),
            sh_type,
            data: data.to_vec(),
            entsize,
        });
        self
    }

    /// Add a `.symtab` + `.strtab` pair (static-linkage layout).
    pub fn with_symbols(self, symbols: &[(&str, u64)]) -> Self {
        let (symtab, strtab) = symbol_blobs(symbols);
        self.with_section(".strtab", SHT_STRTAB, &strtab, 0)
            .with_section(".symtab", SHT_SYMTAB, &symtab, SYM_ENTSIZE as u64)
    }

    /// Add a `.dynsym` + `.dynstr` pair (dynamic-linkage layout).
    pub fn with_dynamic_symbols(self, symbols: &[(&str, u64)]) -> Self {
        let (symtab, strtab) = symbol_blobs(symbols);
        self.with_section(".dynstr", SHT_STRTAB, &strtab, 0)
            .with_section(".dynsym", SHT_DYNSYM, &symtab, SYM_ENTSIZE as u64)
    }

    /// Add a `.rela.dyn` section from `(offset, symbol index, kind, addend)`
    /// tuples.
    pub fn with_rela(self, entries: &[(u64, usize, u32, i64)]) -> Self {
        let mut data = Vec::new();
        for (offset, sym, kind, addend) in entries {
            let rela = Elf64Rela {
                r_offset: *offset,
                r_info: ((*sym as u64) << 32) | u64::from(*kind),
                r_addend: *addend,
            };
            data.extend_from_slice(&bytes_of(&rela));
        }
        self.with_section(
            ".rela.dyn",
            SHT_RELA,
            &data,
            mem::size_of::<Elf64Rela>() as u64,
        )
    }

    /// Emit the undefined sentinel as the section-name table index.
    pub fn undefined_shstrndx(mut self) -> Self {
        self.undef_shstrndx = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let ehsize = mem::size_of::<Elf64Header>();
        let phentsize = mem::size_of::<Elf64ProgramHeader>();
        let shentsize = mem::size_of::<Elf64SectionHeader>();

        let phoff = ehsize;
        let data_start = phoff + self.segments.len() * phentsize;
        let mut blob: Vec<u8> = Vec::new();

        let mut phdrs = Vec::new();
        for seg in &self.segments {
            let p_offset = (data_start + blob.len()) as u64;
            blob.extend_from_slice(&seg.data);
            phdrs.push(Elf64ProgramHeader {
                p_type: PT_LOAD,
                p_flags: PF_R | PF_W | PF_X,
                p_offset,
                p_vaddr: seg.vaddr,
                p_paddr: seg.vaddr,
                p_filesz: seg.data.len() as u64,
                p_memsz: seg.memsz,
                p_align: 0x1000,
            });
        }

        // Section index 0 stays reserved as the null section.
        let null_section = Elf64SectionHeader {
            sh_name: 0,
            sh_type: 0,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: 0,
            sh_size: 0,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 0,
            sh_entsize: 0,
        };
        let mut shdrs = vec![null_section];
        let mut shstrtab = vec![0u8];
        for sec in &self.sections {
            let sh_name = shstrtab.len() as u32;
            shstrtab.extend_from_slice(sec.name.as_bytes());
            shstrtab.push(0);
            let sh_offset = (data_start + blob.len()) as u64;
            blob.extend_from_slice(&sec.data);
            shdrs.push(Elf64SectionHeader {
                sh_name,
                sh_type: sec.sh_type,
                sh_flags: 0,
                sh_addr: 0,
                sh_offset,
                sh_size: sec.data.len() as u64,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: 1,
                sh_entsize: sec.entsize,
            });
        }

        // The section-name table itself comes last, its own name included.
        let sh_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab");
        shstrtab.push(0);
        let sh_offset = (data_start + blob.len()) as u64;
        blob.extend_from_slice(&shstrtab);
        shdrs.push(Elf64SectionHeader {
            sh_name,
            sh_type: SHT_STRTAB,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset,
            sh_size: shstrtab.len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        });

        let shoff = data_start + blob.len();
        let shstrndx = if self.undef_shstrndx {
            0
        } else {
            (shdrs.len() - 1) as u16
        };

        let mut e_ident = [0u8; 16];
        e_ident[0..4].copy_from_slice(&ELF_MAGIC);
        e_ident[4] = ELFCLASS64;
        e_ident[5] = ELFDATA2LSB;
        e_ident[6] = 1; // EV_CURRENT

        let header = Elf64Header {
            e_ident,
            e_type: ET_DYN,
            e_machine: EM_X86_64,
            e_version: 1,
            e_entry: 0,
            e_phoff: phoff as u64,
            e_shoff: shoff as u64,
            e_flags: 0,
            e_ehsize: ehsize as u16,
            e_phentsize: phentsize as u16,
            e_phnum: self.segments.len() as u16,
            e_shentsize: shentsize as u16,
            e_shnum: shdrs.len() as u16,
            e_shstrndx: shstrndx,
        };

        let mut out = bytes_of(&header);
        for phdr in &phdrs {
            out.extend_from_slice(&bytes_of(phdr));
        }
        out.extend_from_slice(&blob);
        for shdr in &shdrs {
            out.extend_from_slice(&bytes_of(shdr));
        }
        out
    }
}
