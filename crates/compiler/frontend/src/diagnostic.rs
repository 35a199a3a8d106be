use std::fmt;

use sable_ast::Span;
use thiserror::Error;

/// The closed set of semantic errors. Every diagnostic the core can
/// produce is one of these variants; downstream drivers match on
/// [`Error::code`] to decide severity policy.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Name resolution.
    #[error("name \"{0}\" not found")]
    NameNotFound(String, Span),
    #[error("using keyword as name")]
    UsingKeywordAsName(Span),
    #[error("\"{0}\" redefinition")]
    Redefinition(String, Span),
    #[error("unknown numeric constant type \"{0}\"")]
    UnknownNumericConstantType(String, Span),
    #[error("\"{0}\" is not a type name")]
    NameIsNotTypeName(String, Span),
    #[error("expected variable, got \"{0}\"")]
    ExpectedVariable(String, Span),

    // Type system.
    #[error("unexpected type, expected \"{expected}\", got \"{got}\"")]
    TypesMismatch {
        expected: String,
        got: String,
        span: Span,
    },
    #[error("no match operator \"{op}\" for types \"{lhs}\" and \"{rhs}\"")]
    NoMatchBinaryOperatorForGivenTypes {
        lhs: String,
        rhs: String,
        op: &'static str,
        span: Span,
    },
    #[error("operation is not supported for type \"{0}\"")]
    OperationNotSupportedForThisType(String, Span),
    #[error("copy-construction of value of non-copyable type \"{0}\"")]
    CopyConstructValueOfNoncopyableType(String, Span),
    #[error("array size is negative")]
    ArraySizeIsNegative(Span),
    #[error("array size is not integer")]
    ArraySizeIsNotInteger(Span),
    #[error("using incomplete type \"{0}\", expected complete type")]
    UsingIncompleteType(String, Span),
    #[error("globals loop detected:\n{0}")]
    GlobalsLoopDetected(String, Span),

    // Control flow.
    #[error("break outside loop")]
    BreakOutsideLoop(Span),
    #[error("continue outside loop")]
    ContinueOutsideLoop(Span),
    #[error("unreachable code")]
    UnreachableCode(Span),
    #[error("missing \"return\" in function returning non-void")]
    NoReturnInFunctionReturningNonVoid(Span),

    // Functions and overloading.
    #[error("invalid function argument count, required {expected}, got {got}")]
    InvalidFunctionArgumentCount {
        expected: usize,
        got: usize,
        span: Span,
    },
    #[error("could not overload function")]
    CouldNotOverloadFunction(Span),
    #[error("could not select function for overloading - too many candidates; args are: {0}")]
    TooManySuitableOverloadedFunctions(String, Span),
    #[error("could not select function for overloading - no candidates; args are: {0}")]
    CouldNotSelectOverloadedFunction(String, Span),
    #[error("duplicated prototype of function \"{0}\"")]
    FunctionPrototypeDuplication(String, Span),
    #[error("body for function \"{0}\" already exists")]
    FunctionBodyDuplication(String, Span),
    #[error("body for generated function \"{0}\"")]
    BodyForGeneratedFunction(String, Span),
    #[error("body for deleted function \"{0}\"")]
    BodyForDeletedFunction(String, Span),

    // Visibility.
    #[error("accessing member \"{name}\" of class \"{class}\" is not allowed in this context")]
    AccessingNonpublicClassMember {
        name: String,
        class: String,
        span: Span,
    },
    #[error("visibility mismatch for function \"{0}\"")]
    FunctionsVisibilityMismatch(String, Span),
    #[error("visibility mismatch for type template \"{0}\"")]
    TypeTemplatesVisibilityMismatch(String, Span),
    #[error("visibility label for struct \"{0}\"")]
    VisibilityForStruct(String, Span),

    // Constant expressions.
    #[error("expected constant expression")]
    ExpectedConstantExpression(Span),
    #[error("variable initializer is not a constant expression")]
    VariableInitializerIsNotConstantExpression(Span),
    #[error("invalid type for constant expression variable")]
    InvalidTypeForConstantExpressionVariable(Span),
    #[error("constant expression result is undefined")]
    ConstantExpressionResultIsUndefined(Span),
    #[error("constexpr function evaluation error: {0}")]
    ConstexprFunctionEvaluationError(String, Span),
    #[error("constexpr function contains unallowed operations")]
    ConstexprFunctionContainsUnallowedOperations(Span),
    #[error("invalid type for constexpr function")]
    InvalidTypeForConstexprFunction(Span),
    #[error("constexpr function must have body")]
    ConstexprFunctionsMustHaveBody(Span),
    #[error("constexpr function can not be virtual")]
    ConstexprFunctionCanNotBeVirtual(Span),

    // static_assert.
    #[error("static_assert expression must have bool type")]
    StaticAssertExpressionMustHaveBoolType(Span),
    #[error("expression in static_assert is not constant")]
    StaticAssertExpressionIsNotConstant(Span),
    #[error("static assertion failed")]
    StaticAssertionFailed(Span),

    // Compile-time bounds checks.
    #[error("array index out of bounds, index is {index}, but array contains only {size} elements")]
    ArrayIndexOutOfBounds { index: u64, size: u64, span: Span },
    #[error("tuple index out of bounds, index is {index}, but tuple contains only {size} elements")]
    TupleIndexOutOfBounds { index: u64, size: u64, span: Span },

    // Initializers.
    #[error("sequence initializer for non-array or tuple")]
    ArrayInitializerForNonArray(Span),
    #[error("array initializers count mismatch, expected {expected}, got {got}")]
    ArrayInitializersCountMismatch {
        expected: usize,
        got: usize,
        span: Span,
    },
    #[error("tuple initializers count mismatch, expected {expected}, got {got}")]
    TupleInitializersCountMismatch {
        expected: usize,
        got: usize,
        span: Span,
    },
    #[error("fundamental types have constructors with exactly one parameter")]
    FundamentalTypesHaveConstructorsWithExactlyOneParameter(Span),
    #[error("references have constructors with exactly one parameter")]
    ReferencesHaveConstructorsWithExactlyOneParameter(Span),
    #[error("unsupported initializer for reference")]
    UnsupportedInitializerForReference(Span),
    #[error("constructor initializer for unsupported type")]
    ConstructorInitializerForUnsupportedType(Span),
    #[error("zero initializer for class")]
    ZeroInitializerForClass(Span),
    #[error("structure initializer for non-struct")]
    StructInitializerForNonStruct(Span),
    #[error("initializer for member \"{0}\", which is not a field")]
    InitializerForNonfieldStructMember(String, Span),
    #[error("initializer for member \"{0}\", which is not this class field")]
    InitializerForBaseClassField(String, Span),
    #[error("duplicated initializer for field \"{0}\"")]
    DuplicatedStructMemberInitializer(String, Span),
    #[error("this kind of initializer is disabled for this class, because it has explicit non-copy constructor(s)")]
    InitializerDisabledBecauseClassHasExplicitNoncopyConstructors(Span),

    // Constructors and destructors.
    #[error("constructor or destructor outside class")]
    ConstructorOrDestructorOutsideClass(Span),
    #[error("constructors and destructors must return void")]
    ConstructorAndDestructorMustReturnVoid(Span),
    #[error("\"byval\" \"this\" for constructor or destructor")]
    ByvalThisForConstructorOrDestructor(Span),
    #[error("conversion constructor must have exactly one argument")]
    ConversionConstructorMustHaveOneArgument(Span),
    #[error("initialization list in non-constructor function")]
    InitializationListInNonConstructor(Span),
    #[error("class has no constructors")]
    ClassHasNoConstructors(Span),
    #[error("field \"{0}\" is not initialized yet")]
    FieldIsNotInitializedYet(String, Span),
    #[error("explicit arguments in destructor")]
    ExplicitArgumentsInDestructor(Span),

    // Methods.
    #[error("accessing field \"{0}\" in static method")]
    ClassFieldAccessInStaticMethod(String, Span),
    #[error("\"this\" in non-class function \"{0}\"")]
    ThisInNonclassFunction(String, Span),
    #[error("\"this\" unavailable")]
    ThisUnavailable(Span),
    #[error("\"base\" unavailable")]
    BaseUnavailable(Span),
    #[error("accessing deleted method")]
    AccessingDeletedMethod(Span),

    // Templates.
    #[error("invalid value as template argument, expected variable or type, got \"{0}\"")]
    InvalidValueAsTemplateArgument(String, Span),
    #[error("invalid type for template variable argument: \"{0}\"")]
    InvalidTypeOfTemplateVariableArgument(String, Span),
    #[error("template parameters deduction failed")]
    TemplateParametersDeductionFailed(Span),
    #[error("value is not a template")]
    ValueIsNotTemplate(Span),
    #[error("\"{0}\" template instantiation required")]
    TemplateInstantiationRequired(String, Span),
    #[error("mandatory template signature argument after optional argument")]
    MandatoryTemplateSignatureArgumentAfterOptionalArgument(Span),
    #[error("\"{0}\" is not deduced yet")]
    TemplateArgumentIsNotDeducedYet(String, Span),
    #[error("template argument \"{0}\" not used in signature")]
    TemplateArgumentNotUsedInSignature(String, Span),
    #[error("\"{0}\" redefinition - type template with such signature already exists in current namespace")]
    TypeTemplateRedefinition(String, Span),
    #[error("instantiation of function template \"{0}\" failed")]
    TemplateFunctionGenerationFailed(String, Span),
    #[error("could not select more specialized type template")]
    CouldNotSelectMoreSpecializedTypeTemplate(Span),
    #[error("required from here")]
    TemplateContext {
        template_name: String,
        declaration_span: Span,
        span: Span,
    },

    // Reference checking.
    #[error("reference protection check for variable \"{0}\" failed")]
    ReferenceProtectionError(String, Span),
    #[error("destroyed variable \"{0}\" still has reference(s)")]
    DestroyedVariableStillHaveReferences(String, Span),
    #[error("accessing moved variable \"{0}\"")]
    AccessingMovedVariable(String, Span),
    #[error("returning unallowed reference")]
    ReturningUnallowedReference(Span),
    #[error("reference self-pollution")]
    SelfReferencePollution(Span),
    #[error("pollution of argument reference")]
    ArgReferencePollution(Span),
    #[error("capturing \"this\" reference in constructor")]
    ConstructorThisReferencePollution(Span),
    #[error("reference pollution for outer variable inside loop, \"{dst}\" polluted by \"{src}\"")]
    MutableReferencePollutionOfOuterLoopVariable {
        dst: String,
        src: String,
        span: Span,
    },
    #[error("outer loop variable \"{0}\" moved inside loop")]
    OuterVariableMoveInsideLoop(String, Span),
    #[error("variable \"{0}\" moved not in all if-else branches")]
    ConditionalMove(String, Span),
    #[error("moved variable \"{0}\" has reference(s)")]
    MovedVariableHaveReferences(String, Span),
    #[error("unallowed reference pollution")]
    UnallowedReferencePollution(Span),
    #[error("explicit reference pollution for copy constructor")]
    ExplicitReferencePollutionForCopyConstructor(Span),
    #[error("explicit reference pollution for copy assignment operator")]
    ExplicitReferencePollutionForCopyAssignmentOperator(Span),
    #[error("reference field \"{0}\" has type with other references inside")]
    ReferenceFieldOfTypeWithReferencesInside(String, Span),
    #[error("expected reference notation for field \"{0}\"")]
    ExpectedReferenceNotation(String, Span),
    #[error("mismatch in count of inner reference tags, expected {expected}, got {got}")]
    InnerReferenceTagCountMismatch {
        expected: usize,
        got: usize,
        span: Span,
    },
    #[error("param number {param} is out of range of function params {count}")]
    ParamNumberOutOfRange { param: u32, count: u32, span: Span },
    #[error("reference tag \"{0}\" is not used")]
    UnusedReferenceTag(String, Span),

    // Operator overloading.
    #[error("operator declaration outside class")]
    OperatorDeclarationOutsideClass(Span),
    #[error("operator does not have parent class arguments")]
    OperatorDoesNotHaveParentClassArguments(Span),
    #[error("invalid argument count for operator")]
    InvalidArgumentCountForOperator(Span),
    #[error("invalid return type for operator, expected \"{0}\"")]
    InvalidReturnTypeForOperator(String, Span),
    #[error("invalid value type for first parameter of operator, expected mutable reference")]
    InvalidFirstParamValueTypeForAssignmentLikeOperator(Span),

    // Enums.
    #[error("underlying type for enum is too small - enum max value is {max_value}, but type max value is {type_max}")]
    UnderlyingTypeForEnumIsTooSmall {
        max_value: u64,
        type_max: u64,
        span: Span,
    },

    // Inheritance.
    #[error("can not derive from \"{0}\"")]
    CanNotDeriveFromThisType(String, Span),
    #[error("parent class \"{0}\" is duplicated")]
    DuplicatedParentClass(String, Span),
    #[error("can not inherit from \"{0}\" because class already has a base")]
    DuplicatedBaseClass(String, Span),
    #[error("fields for interfaces are not allowed")]
    FieldsForInterfacesNotAllowed(Span),
    #[error("base class for interface")]
    BaseClassForInterface(Span),
    #[error("constructor for interface")]
    ConstructorForInterface(Span),
    #[error("constructing object of class \"{0}\", which is abstract or interface")]
    ConstructingAbstractClassOrInterface(String, Span),
    #[error("class \"{class}\" adds \"non_sync\" property over its parent \"{parent}\"")]
    NonSyncTagAdditionInInheritance {
        class: String,
        parent: String,
        span: Span,
    },

    // Virtual functions.
    #[error("virtual for non-class function \"{0}\"")]
    VirtualForNonclassFunction(String, Span),
    #[error("virtual for non-thiscall function \"{0}\"")]
    VirtualForNonThisCallFunction(String, Span),
    #[error("virtual for \"byval\" \"this\" function \"{0}\"")]
    VirtualForByvalThisFunction(String, Span),
    #[error("function \"{0}\" can not be virtual, because its class is not polymorph")]
    VirtualForNonpolymorphClass(String, Span),
    #[error("function \"{0}\" can not be virtual")]
    FunctionCanNotBeVirtual(String, Span),
    #[error("\"virtual\" required for function \"{0}\"")]
    VirtualRequired(String, Span),
    #[error("\"override\" required for function \"{0}\"")]
    OverrideRequired(String, Span),
    #[error("function \"{0}\" marked as \"override\", but does not override")]
    FunctionDoesNotOverride(String, Span),
    #[error("\"override\" for final function \"{0}\"")]
    OverrideFinalFunction(String, Span),
    #[error("\"final\" for first virtual function \"{0}\"")]
    FinalForFirstVirtualFunction(String, Span),
    #[error("body for pure virtual function \"{0}\"")]
    BodyForPureVirtualFunction(String, Span),
    #[error("class \"{0}\" is not interface or abstract and contains pure virtual functions")]
    ClassContainsPureVirtualFunctions(String, Span),
    #[error("interface \"{0}\" contains non-pure virtual functions")]
    NonPureVirtualFunctionInInterface(String, Span),
    #[error("pure destructor for class \"{0}\"")]
    PureDestructor(String, Span),
    #[error("virtual for private function \"{0}\"")]
    VirtualForPrivateFunction(String, Span),
    #[error("\"virtual\" for template function \"{0}\"")]
    VirtualForFunctionTemplate(String, Span),
    #[error("\"virtual\" specifiers mismatch for function \"{0}\"")]
    VirtualMismatch(String, Span),

    // nomangle.
    #[error("\"nomangle\" for non-global function \"{0}\"")]
    NoMangleForNonglobalFunction(String, Span),
    #[error("\"nomangle\" specifiers mismatch for function \"{0}\"")]
    NoMangleMismatch(String, Span),

    // Calling conventions.
    #[error("unknown calling convention \"{0}\"")]
    UnknownCallingConvention(String, Span),
    #[error("only default calling convention is allowed for this method")]
    NonDefaultCallingConventionForClassMethod(Span),

    // Unsafe.
    #[error("calling unsafe function outside unsafe block or unsafe expression")]
    UnsafeFunctionCallOutsideUnsafeBlock(Span),
    #[error("unsafe initializer outside unsafe block or unsafe expression")]
    UninitializedInitializerOutsideUnsafeBlock(Span),
    #[error("accessing global mutable variable outside unsafe block or unsafe expression")]
    GlobalMutableVariableAccessOutsideUnsafeBlock(Span),
    #[error("mutable global references are not allowed")]
    MutableGlobalReferencesAreNotAllowed(Span),

    // References and raw pointers.
    #[error("expected reference value")]
    ExpectedReferenceValue(Span),
    #[error("binding constant reference to non-constant reference")]
    BindingConstReferenceToNonconstReference(Span),
    #[error("expected initializer or constructor for \"{0}\"")]
    ExpectedInitializer(String, Span),
    #[error("value is not a reference")]
    ValueIsNotReference(Span),
    #[error("value of type \"{0}\" is not a pointer")]
    ValueIsNotPointer(String, Span),

    // Coroutines.
    #[error("yield is allowed only inside coroutine functions")]
    YieldOutsideCoroutine(Span),
    #[error("\"generator\" specifiers mismatch for function \"{0}\"")]
    CoroutineMismatch(String, Span),
    #[error("coroutine function can have only the default calling convention")]
    NonDefaultCallingConventionForCoroutine(Span),
    #[error("coroutine method can not be virtual")]
    VirtualCoroutine(Span),
    #[error("special method can not be coroutine")]
    CoroutineSpecialMethod(Span),
    #[error("coroutine has non-sync arguments and/or return value - \"non_sync\" tag required")]
    CoroutineNonSyncRequired(Span),
}

impl Error {
    pub fn span(&self) -> Span {
        match self {
            Self::NameNotFound(_, span)
            | Self::UsingKeywordAsName(span)
            | Self::Redefinition(_, span)
            | Self::UnknownNumericConstantType(_, span)
            | Self::NameIsNotTypeName(_, span)
            | Self::ExpectedVariable(_, span)
            | Self::TypesMismatch { span, .. }
            | Self::NoMatchBinaryOperatorForGivenTypes { span, .. }
            | Self::OperationNotSupportedForThisType(_, span)
            | Self::CopyConstructValueOfNoncopyableType(_, span)
            | Self::ArraySizeIsNegative(span)
            | Self::ArraySizeIsNotInteger(span)
            | Self::UsingIncompleteType(_, span)
            | Self::GlobalsLoopDetected(_, span)
            | Self::BreakOutsideLoop(span)
            | Self::ContinueOutsideLoop(span)
            | Self::UnreachableCode(span)
            | Self::NoReturnInFunctionReturningNonVoid(span)
            | Self::InvalidFunctionArgumentCount { span, .. }
            | Self::CouldNotOverloadFunction(span)
            | Self::TooManySuitableOverloadedFunctions(_, span)
            | Self::CouldNotSelectOverloadedFunction(_, span)
            | Self::FunctionPrototypeDuplication(_, span)
            | Self::FunctionBodyDuplication(_, span)
            | Self::BodyForGeneratedFunction(_, span)
            | Self::BodyForDeletedFunction(_, span)
            | Self::AccessingNonpublicClassMember { span, .. }
            | Self::FunctionsVisibilityMismatch(_, span)
            | Self::TypeTemplatesVisibilityMismatch(_, span)
            | Self::VisibilityForStruct(_, span)
            | Self::ExpectedConstantExpression(span)
            | Self::VariableInitializerIsNotConstantExpression(span)
            | Self::InvalidTypeForConstantExpressionVariable(span)
            | Self::ConstantExpressionResultIsUndefined(span)
            | Self::ConstexprFunctionEvaluationError(_, span)
            | Self::ConstexprFunctionContainsUnallowedOperations(span)
            | Self::InvalidTypeForConstexprFunction(span)
            | Self::ConstexprFunctionsMustHaveBody(span)
            | Self::ConstexprFunctionCanNotBeVirtual(span)
            | Self::StaticAssertExpressionMustHaveBoolType(span)
            | Self::StaticAssertExpressionIsNotConstant(span)
            | Self::StaticAssertionFailed(span)
            | Self::ArrayIndexOutOfBounds { span, .. }
            | Self::TupleIndexOutOfBounds { span, .. }
            | Self::ArrayInitializerForNonArray(span)
            | Self::ArrayInitializersCountMismatch { span, .. }
            | Self::TupleInitializersCountMismatch { span, .. }
            | Self::FundamentalTypesHaveConstructorsWithExactlyOneParameter(span)
            | Self::ReferencesHaveConstructorsWithExactlyOneParameter(span)
            | Self::UnsupportedInitializerForReference(span)
            | Self::ConstructorInitializerForUnsupportedType(span)
            | Self::ZeroInitializerForClass(span)
            | Self::StructInitializerForNonStruct(span)
            | Self::InitializerForNonfieldStructMember(_, span)
            | Self::InitializerForBaseClassField(_, span)
            | Self::DuplicatedStructMemberInitializer(_, span)
            | Self::InitializerDisabledBecauseClassHasExplicitNoncopyConstructors(span)
            | Self::ConstructorOrDestructorOutsideClass(span)
            | Self::ConstructorAndDestructorMustReturnVoid(span)
            | Self::ByvalThisForConstructorOrDestructor(span)
            | Self::ConversionConstructorMustHaveOneArgument(span)
            | Self::InitializationListInNonConstructor(span)
            | Self::ClassHasNoConstructors(span)
            | Self::FieldIsNotInitializedYet(_, span)
            | Self::ExplicitArgumentsInDestructor(span)
            | Self::ClassFieldAccessInStaticMethod(_, span)
            | Self::ThisInNonclassFunction(_, span)
            | Self::ThisUnavailable(span)
            | Self::BaseUnavailable(span)
            | Self::AccessingDeletedMethod(span)
            | Self::InvalidValueAsTemplateArgument(_, span)
            | Self::InvalidTypeOfTemplateVariableArgument(_, span)
            | Self::TemplateParametersDeductionFailed(span)
            | Self::ValueIsNotTemplate(span)
            | Self::TemplateInstantiationRequired(_, span)
            | Self::MandatoryTemplateSignatureArgumentAfterOptionalArgument(span)
            | Self::TemplateArgumentIsNotDeducedYet(_, span)
            | Self::TemplateArgumentNotUsedInSignature(_, span)
            | Self::TypeTemplateRedefinition(_, span)
            | Self::TemplateFunctionGenerationFailed(_, span)
            | Self::CouldNotSelectMoreSpecializedTypeTemplate(span)
            | Self::TemplateContext { span, .. }
            | Self::ReferenceProtectionError(_, span)
            | Self::DestroyedVariableStillHaveReferences(_, span)
            | Self::AccessingMovedVariable(_, span)
            | Self::ReturningUnallowedReference(span)
            | Self::SelfReferencePollution(span)
            | Self::ArgReferencePollution(span)
            | Self::ConstructorThisReferencePollution(span)
            | Self::MutableReferencePollutionOfOuterLoopVariable { span, .. }
            | Self::OuterVariableMoveInsideLoop(_, span)
            | Self::ConditionalMove(_, span)
            | Self::MovedVariableHaveReferences(_, span)
            | Self::UnallowedReferencePollution(span)
            | Self::ExplicitReferencePollutionForCopyConstructor(span)
            | Self::ExplicitReferencePollutionForCopyAssignmentOperator(span)
            | Self::ReferenceFieldOfTypeWithReferencesInside(_, span)
            | Self::ExpectedReferenceNotation(_, span)
            | Self::InnerReferenceTagCountMismatch { span, .. }
            | Self::ParamNumberOutOfRange { span, .. }
            | Self::UnusedReferenceTag(_, span)
            | Self::OperatorDeclarationOutsideClass(span)
            | Self::OperatorDoesNotHaveParentClassArguments(span)
            | Self::InvalidArgumentCountForOperator(span)
            | Self::InvalidReturnTypeForOperator(_, span)
            | Self::InvalidFirstParamValueTypeForAssignmentLikeOperator(span)
            | Self::UnderlyingTypeForEnumIsTooSmall { span, .. }
            | Self::CanNotDeriveFromThisType(_, span)
            | Self::DuplicatedParentClass(_, span)
            | Self::DuplicatedBaseClass(_, span)
            | Self::FieldsForInterfacesNotAllowed(span)
            | Self::BaseClassForInterface(span)
            | Self::ConstructorForInterface(span)
            | Self::ConstructingAbstractClassOrInterface(_, span)
            | Self::NonSyncTagAdditionInInheritance { span, .. }
            | Self::VirtualForNonclassFunction(_, span)
            | Self::VirtualForNonThisCallFunction(_, span)
            | Self::VirtualForByvalThisFunction(_, span)
            | Self::VirtualForNonpolymorphClass(_, span)
            | Self::FunctionCanNotBeVirtual(_, span)
            | Self::VirtualRequired(_, span)
            | Self::OverrideRequired(_, span)
            | Self::FunctionDoesNotOverride(_, span)
            | Self::OverrideFinalFunction(_, span)
            | Self::FinalForFirstVirtualFunction(_, span)
            | Self::BodyForPureVirtualFunction(_, span)
            | Self::ClassContainsPureVirtualFunctions(_, span)
            | Self::NonPureVirtualFunctionInInterface(_, span)
            | Self::PureDestructor(_, span)
            | Self::VirtualForPrivateFunction(_, span)
            | Self::VirtualForFunctionTemplate(_, span)
            | Self::VirtualMismatch(_, span)
            | Self::NoMangleForNonglobalFunction(_, span)
            | Self::NoMangleMismatch(_, span)
            | Self::UnknownCallingConvention(_, span)
            | Self::NonDefaultCallingConventionForClassMethod(span)
            | Self::UnsafeFunctionCallOutsideUnsafeBlock(span)
            | Self::UninitializedInitializerOutsideUnsafeBlock(span)
            | Self::GlobalMutableVariableAccessOutsideUnsafeBlock(span)
            | Self::MutableGlobalReferencesAreNotAllowed(span)
            | Self::ExpectedReferenceValue(span)
            | Self::BindingConstReferenceToNonconstReference(span)
            | Self::ExpectedInitializer(_, span)
            | Self::ValueIsNotReference(span)
            | Self::ValueIsNotPointer(_, span)
            | Self::YieldOutsideCoroutine(span)
            | Self::CoroutineMismatch(_, span)
            | Self::NonDefaultCallingConventionForCoroutine(span)
            | Self::VirtualCoroutine(span)
            | Self::CoroutineSpecialMethod(span)
            | Self::CoroutineNonSyncRequired(span) => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NameNotFound(..) => "NameNotFound",
            Self::UsingKeywordAsName(..) => "UsingKeywordAsName",
            Self::Redefinition(..) => "Redefinition",
            Self::UnknownNumericConstantType(..) => "UnknownNumericConstantType",
            Self::NameIsNotTypeName(..) => "NameIsNotTypeName",
            Self::ExpectedVariable(..) => "ExpectedVariable",
            Self::TypesMismatch { .. } => "TypesMismatch",
            Self::NoMatchBinaryOperatorForGivenTypes { .. } => "NoMatchBinaryOperatorForGivenTypes",
            Self::OperationNotSupportedForThisType(..) => "OperationNotSupportedForThisType",
            Self::CopyConstructValueOfNoncopyableType(..) => "CopyConstructValueOfNoncopyableType",
            Self::ArraySizeIsNegative(..) => "ArraySizeIsNegative",
            Self::ArraySizeIsNotInteger(..) => "ArraySizeIsNotInteger",
            Self::UsingIncompleteType(..) => "UsingIncompleteType",
            Self::GlobalsLoopDetected(..) => "GlobalsLoopDetected",
            Self::BreakOutsideLoop(..) => "BreakOutsideLoop",
            Self::ContinueOutsideLoop(..) => "ContinueOutsideLoop",
            Self::UnreachableCode(..) => "UnreachableCode",
            Self::NoReturnInFunctionReturningNonVoid(..) => "NoReturnInFunctionReturningNonVoid",
            Self::InvalidFunctionArgumentCount { .. } => "InvalidFunctionArgumentCount",
            Self::CouldNotOverloadFunction(..) => "CouldNotOverloadFunction",
            Self::TooManySuitableOverloadedFunctions(..) => "TooManySuitableOverloadedFunctions",
            Self::CouldNotSelectOverloadedFunction(..) => "CouldNotSelectOverloadedFunction",
            Self::FunctionPrototypeDuplication(..) => "FunctionPrototypeDuplication",
            Self::FunctionBodyDuplication(..) => "FunctionBodyDuplication",
            Self::BodyForGeneratedFunction(..) => "BodyForGeneratedFunction",
            Self::BodyForDeletedFunction(..) => "BodyForDeletedFunction",
            Self::AccessingNonpublicClassMember { .. } => "AccessingNonpublicClassMember",
            Self::FunctionsVisibilityMismatch(..) => "FunctionsVisibilityMismatch",
            Self::TypeTemplatesVisibilityMismatch(..) => "TypeTemplatesVisibilityMismatch",
            Self::VisibilityForStruct(..) => "VisibilityForStruct",
            Self::ExpectedConstantExpression(..) => "ExpectedConstantExpression",
            Self::VariableInitializerIsNotConstantExpression(..) => {
                "VariableInitializerIsNotConstantExpression"
            }
            Self::InvalidTypeForConstantExpressionVariable(..) => {
                "InvalidTypeForConstantExpressionVariable"
            }
            Self::ConstantExpressionResultIsUndefined(..) => "ConstantExpressionResultIsUndefined",
            Self::ConstexprFunctionEvaluationError(..) => "ConstexprFunctionEvaluationError",
            Self::ConstexprFunctionContainsUnallowedOperations(..) => {
                "ConstexprFunctionContainsUnallowedOperations"
            }
            Self::InvalidTypeForConstexprFunction(..) => "InvalidTypeForConstexprFunction",
            Self::ConstexprFunctionsMustHaveBody(..) => "ConstexprFunctionsMustHaveBody",
            Self::ConstexprFunctionCanNotBeVirtual(..) => "ConstexprFunctionCanNotBeVirtual",
            Self::StaticAssertExpressionMustHaveBoolType(..) => {
                "StaticAssertExpressionMustHaveBoolType"
            }
            Self::StaticAssertExpressionIsNotConstant(..) => "StaticAssertExpressionIsNotConstant",
            Self::StaticAssertionFailed(..) => "StaticAssertionFailed",
            Self::ArrayIndexOutOfBounds { .. } => "ArrayIndexOutOfBounds",
            Self::TupleIndexOutOfBounds { .. } => "TupleIndexOutOfBounds",
            Self::ArrayInitializerForNonArray(..) => "ArrayInitializerForNonArray",
            Self::ArrayInitializersCountMismatch { .. } => "ArrayInitializersCountMismatch",
            Self::TupleInitializersCountMismatch { .. } => "TupleInitializersCountMismatch",
            Self::FundamentalTypesHaveConstructorsWithExactlyOneParameter(..) => {
                "FundamentalTypesHaveConstructorsWithExactlyOneParameter"
            }
            Self::ReferencesHaveConstructorsWithExactlyOneParameter(..) => {
                "ReferencesHaveConstructorsWithExactlyOneParameter"
            }
            Self::UnsupportedInitializerForReference(..) => "UnsupportedInitializerForReference",
            Self::ConstructorInitializerForUnsupportedType(..) => {
                "ConstructorInitializerForUnsupportedType"
            }
            Self::ZeroInitializerForClass(..) => "ZeroInitializerForClass",
            Self::StructInitializerForNonStruct(..) => "StructInitializerForNonStruct",
            Self::InitializerForNonfieldStructMember(..) => "InitializerForNonfieldStructMember",
            Self::InitializerForBaseClassField(..) => "InitializerForBaseClassField",
            Self::DuplicatedStructMemberInitializer(..) => "DuplicatedStructMemberInitializer",
            Self::InitializerDisabledBecauseClassHasExplicitNoncopyConstructors(..) => {
                "InitializerDisabledBecauseClassHasExplicitNoncopyConstructors"
            }
            Self::ConstructorOrDestructorOutsideClass(..) => "ConstructorOrDestructorOutsideClass",
            Self::ConstructorAndDestructorMustReturnVoid(..) => {
                "ConstructorAndDestructorMustReturnVoid"
            }
            Self::ByvalThisForConstructorOrDestructor(..) => "ByvalThisForConstructorOrDestructor",
            Self::ConversionConstructorMustHaveOneArgument(..) => {
                "ConversionConstructorMustHaveOneArgument"
            }
            Self::InitializationListInNonConstructor(..) => "InitializationListInNonConstructor",
            Self::ClassHasNoConstructors(..) => "ClassHasNoConstructors",
            Self::FieldIsNotInitializedYet(..) => "FieldIsNotInitializedYet",
            Self::ExplicitArgumentsInDestructor(..) => "ExplicitArgumentsInDestructor",
            Self::ClassFieldAccessInStaticMethod(..) => "ClassFieldAccessInStaticMethod",
            Self::ThisInNonclassFunction(..) => "ThisInNonclassFunction",
            Self::ThisUnavailable(..) => "ThisUnavailable",
            Self::BaseUnavailable(..) => "BaseUnavailable",
            Self::AccessingDeletedMethod(..) => "AccessingDeletedMethod",
            Self::InvalidValueAsTemplateArgument(..) => "InvalidValueAsTemplateArgument",
            Self::InvalidTypeOfTemplateVariableArgument(..) => {
                "InvalidTypeOfTemplateVariableArgument"
            }
            Self::TemplateParametersDeductionFailed(..) => "TemplateParametersDeductionFailed",
            Self::ValueIsNotTemplate(..) => "ValueIsNotTemplate",
            Self::TemplateInstantiationRequired(..) => "TemplateInstantiationRequired",
            Self::MandatoryTemplateSignatureArgumentAfterOptionalArgument(..) => {
                "MandatoryTemplateSignatureArgumentAfterOptionalArgument"
            }
            Self::TemplateArgumentIsNotDeducedYet(..) => "TemplateArgumentIsNotDeducedYet",
            Self::TemplateArgumentNotUsedInSignature(..) => "TemplateArgumentNotUsedInSignature",
            Self::TypeTemplateRedefinition(..) => "TypeTemplateRedefinition",
            Self::TemplateFunctionGenerationFailed(..) => "TemplateFunctionGenerationFailed",
            Self::CouldNotSelectMoreSpecializedTypeTemplate(..) => {
                "CouldNotSelectMoreSpecializedTypeTemplate"
            }
            Self::TemplateContext { .. } => "TemplateContext",
            Self::ReferenceProtectionError(..) => "ReferenceProtectionError",
            Self::DestroyedVariableStillHaveReferences(..) => {
                "DestroyedVariableStillHaveReferences"
            }
            Self::AccessingMovedVariable(..) => "AccessingMovedVariable",
            Self::ReturningUnallowedReference(..) => "ReturningUnallowedReference",
            Self::SelfReferencePollution(..) => "SelfReferencePollution",
            Self::ArgReferencePollution(..) => "ArgReferencePollution",
            Self::ConstructorThisReferencePollution(..) => "ConstructorThisReferencePollution",
            Self::MutableReferencePollutionOfOuterLoopVariable { .. } => {
                "MutableReferencePollutionOfOuterLoopVariable"
            }
            Self::OuterVariableMoveInsideLoop(..) => "OuterVariableMoveInsideLoop",
            Self::ConditionalMove(..) => "ConditionalMove",
            Self::MovedVariableHaveReferences(..) => "MovedVariableHaveReferences",
            Self::UnallowedReferencePollution(..) => "UnallowedReferencePollution",
            Self::ExplicitReferencePollutionForCopyConstructor(..) => {
                "ExplicitReferencePollutionForCopyConstructor"
            }
            Self::ExplicitReferencePollutionForCopyAssignmentOperator(..) => {
                "ExplicitReferencePollutionForCopyAssignmentOperator"
            }
            Self::ReferenceFieldOfTypeWithReferencesInside(..) => {
                "ReferenceFieldOfTypeWithReferencesInside"
            }
            Self::ExpectedReferenceNotation(..) => "ExpectedReferenceNotation",
            Self::InnerReferenceTagCountMismatch { .. } => "InnerReferenceTagCountMismatch",
            Self::ParamNumberOutOfRange { .. } => "ParamNumberOutOfRange",
            Self::UnusedReferenceTag(..) => "UnusedReferenceTag",
            Self::OperatorDeclarationOutsideClass(..) => "OperatorDeclarationOutsideClass",
            Self::OperatorDoesNotHaveParentClassArguments(..) => {
                "OperatorDoesNotHaveParentClassArguments"
            }
            Self::InvalidArgumentCountForOperator(..) => "InvalidArgumentCountForOperator",
            Self::InvalidReturnTypeForOperator(..) => "InvalidReturnTypeForOperator",
            Self::InvalidFirstParamValueTypeForAssignmentLikeOperator(..) => {
                "InvalidFirstParamValueTypeForAssignmentLikeOperator"
            }
            Self::UnderlyingTypeForEnumIsTooSmall { .. } => "UnderlyingTypeForEnumIsTooSmall",
            Self::CanNotDeriveFromThisType(..) => "CanNotDeriveFromThisType",
            Self::DuplicatedParentClass(..) => "DuplicatedParentClass",
            Self::DuplicatedBaseClass(..) => "DuplicatedBaseClass",
            Self::FieldsForInterfacesNotAllowed(..) => "FieldsForInterfacesNotAllowed",
            Self::BaseClassForInterface(..) => "BaseClassForInterface",
            Self::ConstructorForInterface(..) => "ConstructorForInterface",
            Self::ConstructingAbstractClassOrInterface(..) => {
                "ConstructingAbstractClassOrInterface"
            }
            Self::NonSyncTagAdditionInInheritance { .. } => "NonSyncTagAdditionInInheritance",
            Self::VirtualForNonclassFunction(..) => "VirtualForNonclassFunction",
            Self::VirtualForNonThisCallFunction(..) => "VirtualForNonThisCallFunction",
            Self::VirtualForByvalThisFunction(..) => "VirtualForByvalThisFunction",
            Self::VirtualForNonpolymorphClass(..) => "VirtualForNonpolymorphClass",
            Self::FunctionCanNotBeVirtual(..) => "FunctionCanNotBeVirtual",
            Self::VirtualRequired(..) => "VirtualRequired",
            Self::OverrideRequired(..) => "OverrideRequired",
            Self::FunctionDoesNotOverride(..) => "FunctionDoesNotOverride",
            Self::OverrideFinalFunction(..) => "OverrideFinalFunction",
            Self::FinalForFirstVirtualFunction(..) => "FinalForFirstVirtualFunction",
            Self::BodyForPureVirtualFunction(..) => "BodyForPureVirtualFunction",
            Self::ClassContainsPureVirtualFunctions(..) => "ClassContainsPureVirtualFunctions",
            Self::NonPureVirtualFunctionInInterface(..) => "NonPureVirtualFunctionInInterface",
            Self::PureDestructor(..) => "PureDestructor",
            Self::VirtualForPrivateFunction(..) => "VirtualForPrivateFunction",
            Self::VirtualForFunctionTemplate(..) => "VirtualForFunctionTemplate",
            Self::VirtualMismatch(..) => "VirtualMismatch",
            Self::NoMangleForNonglobalFunction(..) => "NoMangleForNonglobalFunction",
            Self::NoMangleMismatch(..) => "NoMangleMismatch",
            Self::UnknownCallingConvention(..) => "UnknownCallingConvention",
            Self::NonDefaultCallingConventionForClassMethod(..) => {
                "NonDefaultCallingConventionForClassMethod"
            }
            Self::UnsafeFunctionCallOutsideUnsafeBlock(..) => {
                "UnsafeFunctionCallOutsideUnsafeBlock"
            }
            Self::UninitializedInitializerOutsideUnsafeBlock(..) => {
                "UninitializedInitializerOutsideUnsafeBlock"
            }
            Self::GlobalMutableVariableAccessOutsideUnsafeBlock(..) => {
                "GlobalMutableVariableAccessOutsideUnsafeBlock"
            }
            Self::MutableGlobalReferencesAreNotAllowed(..) => {
                "MutableGlobalReferencesAreNotAllowed"
            }
            Self::ExpectedReferenceValue(..) => "ExpectedReferenceValue",
            Self::BindingConstReferenceToNonconstReference(..) => {
                "BindingConstReferenceToNonconstReference"
            }
            Self::ExpectedInitializer(..) => "ExpectedInitializer",
            Self::ValueIsNotReference(..) => "ValueIsNotReference",
            Self::ValueIsNotPointer(..) => "ValueIsNotPointer",
            Self::YieldOutsideCoroutine(..) => "YieldOutsideCoroutine",
            Self::CoroutineMismatch(..) => "CoroutineMismatch",
            Self::NonDefaultCallingConventionForCoroutine(..) => {
                "NonDefaultCallingConventionForCoroutine"
            }
            Self::VirtualCoroutine(..) => "VirtualCoroutine",
            Self::CoroutineSpecialMethod(..) => "CoroutineSpecialMethod",
            Self::CoroutineNonSyncRequired(..) => "CoroutineNonSyncRequired",
        }
    }

    pub fn level(&self) -> DiagnosticLevel {
        match self {
            Self::UnreachableCode(_) | Self::UnusedReferenceTag(..) => DiagnosticLevel::Warning,
            _ => DiagnosticLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

/// An error together with the chain of template instantiations it was
/// raised in. Errors produced while building a template instantiation
/// carry one [`Error::TemplateContext`] note per enclosing
/// instantiation, pointing at the request site.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub error: Error,
    pub notes: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn new(error: Error) -> Self {
        Self {
            error,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(error: Error, notes: Vec<Diagnostic>) -> Self {
        Self { error, notes }
    }

    pub fn span(&self) -> Span {
        self.error.span()
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

impl From<Error> for Diagnostic {
    #[inline]
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span(), self.error)?;
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

/// Accumulating error sink. Semantic errors are collected, never thrown;
/// analysis continues with recovery values so one build surfaces as many
/// independent errors as possible.
#[derive(Debug, Default)]
pub struct Reporter {
    reported: Vec<Diagnostic>,
}

impl Reporter {
    #[inline]
    pub fn report(&mut self, error: impl Into<Diagnostic>) {
        self.reported.push(error.into());
    }

    pub fn report_many(&mut self, errors: impl IntoIterator<Item = impl Into<Diagnostic>>) {
        self.reported.extend(errors.into_iter().map(Into::into));
    }

    pub fn unwrap_err<A>(&mut self, res: Result<A, impl Into<Diagnostic>>) -> Option<A> {
        match res {
            Ok(res) => Some(res),
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    #[inline]
    pub fn reported(&self) -> &[Diagnostic] {
        &self.reported
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }

    #[inline]
    pub fn into_reported(self) -> Vec<Diagnostic> {
        self.reported
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.reported)
    }
}

/// Final normalization applied once at the end of a build: sort by
/// source position, then by error code, then by message, and drop exact
/// duplicates (the same error is often produced once per import path).
pub fn normalize(mut diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    diagnostics.sort_by(|a, b| {
        let key = |d: &Diagnostic| (d.span().file, d.span().start, d.code());
        key(a).cmp(&key(b)).then_with(|| {
            a.error.to_string().cmp(&b.error.to_string())
        })
    });
    diagnostics.dedup_by(|a, b| {
        a.span() == b.span() && a.code() == b.code() && a.error.to_string() == b.error.to_string()
    });
    diagnostics
}
