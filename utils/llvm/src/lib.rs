pub mod globalvar;
pub mod llvminstr;
pub mod llvmop;
pub mod llvmvar;
pub mod temp;

mod impls;

pub use globalvar::GlobalVar;
pub use llvminstr::*;
pub use llvmop::*;
pub use llvmvar::VarType;
pub use temp::*;

pub type LlvmTemp = Temp;
pub type LlvmTempManager = TempManager;

pub enum LlvmInstrVariant<'a> {
	ArithInstr(&'a ArithInstr),
	CompInstr(&'a CompInstr),
	ConvertInstr(&'a ConvertInstr),
	JumpInstr(&'a JumpInstr),
	JumpCondInstr(&'a JumpCondInstr),
	PhiInstr(&'a PhiInstr),
	RetInstr(&'a RetInstr),
	UnreachableInstr(&'a UnreachableInstr),
	AllocInstr(&'a AllocInstr),
	StoreInstr(&'a StoreInstr),
	LoadInstr(&'a LoadInstr),
	GEPInstr(&'a GEPInstr),
	CallInstr(&'a CallInstr),
	CallPtrInstr(&'a CallPtrInstr),
}
